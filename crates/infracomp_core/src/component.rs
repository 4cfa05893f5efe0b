//! Lazy, memoized components.
//!
//! A [`Component`] wraps a named deferred computation. The first successful
//! [`Component::get`] against a [`DeployContext`] runs the computation and
//! caches its value in the context's registry; every later `get` for the same
//! name, from this handle or any other, replays the cached value. A failed
//! computation caches nothing, so the next `get` runs it again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use infracomp_engine::{Resource, ResourceOptions};
use tracing::{debug, info, warn};

use crate::context::DeployContext;
use crate::error::CompResult;
use crate::meta::Meta;

type Computation<T> =
    Arc<dyn Fn(DeployContext, String) -> BoxFuture<'static, CompResult<T>> + Send + Sync>;

/// What every component accessor hands back: the label and the value.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentResponse<T> {
    pub meta: Meta,
    pub component: T,
}

impl<T> ComponentResponse<T> {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn into_inner(self) -> T {
        self.component
    }
}

/// A named, lazily evaluated and memoized construction step.
///
/// Handles are cheap to clone. The computation must not `get` a component
/// with its own name, since the name's slot is locked while it runs.
pub struct Component<T> {
    meta: Meta,
    computation: Computation<T>,
    inactive: bool,
}

impl<T> Clone for Component<T> {
    fn clone(&self) -> Self {
        Self {
            meta: self.meta.clone(),
            computation: Arc::clone(&self.computation),
            inactive: self.inactive,
        }
    }
}

impl<T> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("meta", &self.meta)
            .field("inactive", &self.inactive)
            .finish()
    }
}

impl<T> Component<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a component from a computation that only needs the context.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(DeployContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompResult<T>> + Send + 'static,
    {
        let computation: Computation<T> =
            Arc::new(move |ctx: DeployContext, _name: String| f(ctx).boxed());
        Self {
            meta: Meta::new(name),
            computation,
            inactive: false,
        }
    }

    /// Create a component from full metadata.
    ///
    /// The computation receives the resolved component name. An inactive
    /// `meta` yields an inactive component and `f` is dropped unused.
    pub fn with_meta<F, Fut>(meta: impl Into<Meta>, f: F) -> Self
    where
        T: Default,
        F: Fn(DeployContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompResult<T>> + Send + 'static,
    {
        let meta = meta.into();
        if !meta.active {
            return Self::inactive(meta);
        }
        let computation: Computation<T> =
            Arc::new(move |ctx: DeployContext, name: String| f(ctx, name).boxed());
        Self {
            meta,
            computation,
            inactive: false,
        }
    }

    /// A component that always resolves to `T::default()`.
    ///
    /// It never runs any computation and never touches the registry, so it
    /// cannot observe or disturb an active component of the same name.
    pub fn inactive(meta: impl Into<Meta>) -> Self
    where
        T: Default,
    {
        let mut meta = meta.into();
        meta.active = false;
        let computation: Computation<T> = Arc::new(|_: DeployContext, _: String| {
            future::ready(Ok(T::default())).boxed()
        });
        Self {
            meta,
            computation,
            inactive: true,
        }
    }

    /// Two-phase construction: resolve the arguments, then build.
    ///
    /// If `args_fn` fails the builder is never invoked.
    pub fn with_lazy_args<A, AF, AFut, B, BFut>(meta: impl Into<Meta>, args_fn: AF, builder: B) -> Self
    where
        T: Default,
        A: Send + 'static,
        AF: Fn(DeployContext) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = CompResult<A>> + Send + 'static,
        B: Fn(DeployContext, String, A) -> BFut + Send + Sync + 'static,
        BFut: Future<Output = CompResult<T>> + Send + 'static,
    {
        let builder = Arc::new(builder);
        Self::with_meta(meta, move |ctx: DeployContext, name: String| {
            let args = args_fn(ctx.clone());
            let builder = Arc::clone(&builder);
            async move {
                let args = args.await?;
                builder(ctx, name, args).await
            }
        })
    }

    /// Wrap a resource constructor called with fixed arguments.
    ///
    /// `meta.protect` is folded into the resource options.
    pub fn from_constructor<A, C, Fut>(meta: impl Into<Meta>, ctor: C, args: A, opts: ResourceOptions) -> Self
    where
        T: Default,
        A: Clone + Send + Sync + 'static,
        C: Fn(DeployContext, String, A, ResourceOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompResult<T>> + Send + 'static,
    {
        let meta = meta.into();
        let protect = opts.protect || meta.protect;
        let opts = opts.protect(protect);
        Self::with_meta(meta, move |ctx: DeployContext, name: String| {
            ctor(ctx, name, args.clone(), opts.clone())
        })
    }

    /// Wrap a resource constructor whose arguments and options are computed
    /// on first use, typically from other components.
    pub fn from_lazy_constructor<A, C, Fut, AF, AFut>(meta: impl Into<Meta>, ctor: C, args_fn: AF) -> Self
    where
        T: Default,
        A: Send + 'static,
        C: Fn(DeployContext, String, A, ResourceOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CompResult<T>> + Send + 'static,
        AF: Fn(DeployContext) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = CompResult<(A, ResourceOptions)>> + Send + 'static,
    {
        let meta = meta.into();
        let protect = meta.protect;
        Self::with_lazy_args(
            meta,
            args_fn,
            move |ctx: DeployContext, name: String, (args, opts): (A, ResourceOptions)| {
                let protect = opts.protect || protect;
                ctor(ctx, name, args, opts.protect(protect))
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn is_inactive(&self) -> bool {
        self.inactive
    }

    fn response(&self, component: T) -> ComponentResponse<T> {
        ComponentResponse {
            meta: self.meta.clone(),
            component,
        }
    }

    /// Resolve the component, running its computation at most once per name
    /// and context.
    ///
    /// Errors from the computation are wrapped with the component name and
    /// leave nothing cached. Inactive components skip name validation and
    /// always yield their default value.
    pub async fn get(&self, ctx: &DeployContext) -> CompResult<ComponentResponse<T>> {
        if self.inactive {
            let name = self.meta.name.trim().to_string();
            debug!("Component {} is inactive", name);
            let value = (self.computation)(ctx.clone(), name).await?;
            return Ok(self.response(value));
        }

        let name = self.meta.full_name()?;

        let slot = ctx.registry().slot::<T>(&name)?;
        let mut cached = slot.lock().await;
        if let Some(value) = cached.as_ref() {
            debug!("Component {} resolved from cache", name);
            return Ok(self.response(value.clone()));
        }

        info!("Instantiating component: {}", name);
        match (self.computation)(ctx.clone(), name.clone()).await {
            Ok(value) => {
                *cached = Some(value.clone());
                Ok(self.response(value))
            }
            Err(e) => {
                warn!("Component {} failed: {}", name, e);
                Err(e.in_component(name))
            }
        }
    }

    /// Resolve the component and feed it to a continuation.
    ///
    /// The continuation is skipped when resolution fails.
    pub async fn get_and_then<U, F, Fut>(&self, ctx: &DeployContext, f: F) -> CompResult<U>
    where
        F: FnOnce(ComponentResponse<T>) -> Fut,
        Fut: Future<Output = CompResult<U>>,
    {
        let response = self.get(ctx).await?;
        f(response).await
    }

    /// Resolve the component for its side effects only.
    pub async fn apply(&self, ctx: &DeployContext) -> CompResult<()> {
        self.get(ctx).await.map(|_| ())
    }
}

/// Anything that can be resolved for its side effects.
#[async_trait]
pub trait Applier: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, ctx: &DeployContext) -> CompResult<()>;
}

#[async_trait]
impl<T> Applier for Component<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.meta.name
    }

    async fn apply(&self, ctx: &DeployContext) -> CompResult<()> {
        Component::get(self, ctx).await.map(|_| ())
    }
}

/// Apply handles in order, stopping at the first failure.
pub async fn apply_all(ctx: &DeployContext, appliers: &[&dyn Applier]) -> CompResult<()> {
    for applier in appliers {
        debug!("Applying {}", applier.name());
        applier.apply(ctx).await?;
    }
    Ok(())
}

/// Export the URN of a resolved resource as `"{name}-id"`.
pub fn export_urn<'a, T: Resource>(
    ctx: &DeployContext,
    response: &'a ComponentResponse<T>,
) -> &'a ComponentResponse<T> {
    ctx.export(format!("{}-id", response.name()), response.component.urn());
    response
}
