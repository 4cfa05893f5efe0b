//! Integration tests for component caching semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use infracomp_core::{apply_all, Applier, CompError, Component, ComponentRegistry, DeployContext, Meta};
use infracomp_engine::{MockEngine, ResourceOptions, ResourceState};
use parking_lot::Mutex;
use serde_json::json;

fn context() -> DeployContext {
    DeployContext::new("shop", "test", Arc::new(MockEngine::default()))
}

/// A component returning `value` that counts its invocations.
fn counted(name: &str, value: u32) -> (Component<u32>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let component = Component::new(name, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(value) }
    });
    (component, calls)
}

/// A component that always fails and counts its invocations.
fn failing(name: &str) -> (Component<u32>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let component = Component::new(name, move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err(CompError::construction(format!("attempt {attempt} failed"))) }
    });
    (component, calls)
}

#[tokio::test]
async fn test_distinct_names_do_not_share_state() {
    let ctx = context();
    let (a, a_calls) = counted("subnet-a", 1);
    let (b, b_calls) = counted("subnet-b", 2);

    assert_eq!(a.get(&ctx).await.unwrap().component, 1);
    assert_eq!(b.get(&ctx).await.unwrap().component, 2);
    assert_eq!(a.get(&ctx).await.unwrap().component, 1);

    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_same_name_shares_cached_value() {
    let ctx = context();
    let (first, first_calls) = counted("vpc", 10);
    let (second, second_calls) = counted("vpc", 20);

    assert_eq!(first.get(&ctx).await.unwrap().component, 10);
    assert_eq!(second.get(&ctx).await.unwrap().component, 10);

    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_separate_runs_are_isolated() {
    let (vpc, calls) = counted("vpc", 1);

    vpc.apply(&context()).await.unwrap();
    vpc.apply(&context()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let registry = ComponentRegistry::new();
    let ctx = context().with_registry(registry.clone());
    vpc.apply(&ctx).await.unwrap();
    registry.clear();
    vpc.apply(&ctx).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_repeated_get_runs_once() {
    let ctx = context();
    let (vpc, calls) = counted("vpc", 7);

    for _ in 0..10 {
        assert_eq!(vpc.get(&ctx).await.unwrap().component, 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_is_retried() {
    let ctx = context();
    let (broken, calls) = failing("broken");

    for attempt in 1..=3 {
        let err = broken.get(&ctx).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), attempt);
        assert_eq!(err.component_path(), vec!["broken"]);
        assert!(err.to_string().contains(&format!("attempt {attempt} failed")));
    }
}

#[tokio::test]
async fn test_failure_then_success_caches() {
    let ctx = context();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let flaky = Component::new("flaky", move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(CompError::construction("throttled"))
            } else {
                Ok(attempt as u32)
            }
        }
    });

    assert!(flaky.get(&ctx).await.is_err());
    assert_eq!(flaky.get(&ctx).await.unwrap().component, 1);
    assert_eq!(flaky.get(&ctx).await.unwrap().component, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_inactive_never_invokes() {
    let ctx = context();
    let (active, active_calls) = failing("lb");
    let inactive: Component<u32> = Component::inactive("lb");

    for _ in 0..3 {
        let response = inactive.get(&ctx).await.unwrap();
        assert_eq!(response.component, 0);
        assert_eq!(response.name(), "lb");
    }
    assert!(active.get(&ctx).await.is_err());
    assert_eq!(inactive.get(&ctx).await.unwrap().component, 0);
    assert_eq!(active_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_apply_all_stops_at_first_failure() {
    let ctx = context();
    let (h1, h1_calls) = counted("h1", 1);
    let (h2, h2_calls) = failing("h2");
    let (h3, h3_calls) = counted("h3", 3);

    let err = apply_all(&ctx, &[&h1, &h2, &h3]).await.unwrap_err();

    assert_eq!(h1_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h2_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h3_calls.load(Ordering::SeqCst), 0);
    assert_eq!(err.component_path(), vec!["h2"]);
    assert_eq!(Applier::name(&h3), "h3");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_runs_once() {
    let ctx = context();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let slow = Component::new("slow", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Arc::new("materialized".to_string()))
        }
    });

    let mut handles = Vec::new();
    for _ in 0..50 {
        let slow = slow.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { slow.get(&ctx).await.map(|r| r.component) }));
    }

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_retries_after_first_failure() {
    let ctx = context();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let flaky = Component::new("flaky", move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if attempt == 1 {
                Err(CompError::construction("throttled"))
            } else {
                Ok(Arc::new(format!("attempt {attempt}")))
            }
        }
    });

    let mut handles = Vec::new();
    for _ in 0..20 {
        let flaky = flaky.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { flaky.get(&ctx).await.map(|r| r.component) }));
    }

    let mut failures = 0;
    let mut values = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(value) => values.push(value),
            Err(err) => {
                assert!(err.to_string().contains("throttled"));
                failures += 1;
            }
        }
    }

    // The first holder fails, the next one succeeds, everyone else hits the cache
    assert_eq!(failures, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(values.len(), 19);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    assert_eq!(values[0].as_str(), "attempt 2");

    let later = flaky.get(&ctx).await.unwrap().component;
    assert!(Arc::ptr_eq(&later, &values[0]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_identity_after_apply() {
    let engine = MockEngine::new("shop", "test");
    let ctx = DeployContext::new("shop", "test", Arc::new(engine.clone()));
    let produced: Arc<Mutex<Option<Arc<ResourceState>>>> = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&produced);
    let vpc = Component::new("vpc-1", move |ctx| {
        let sink = Arc::clone(&sink);
        async move {
            let state = ctx
                .register_resource("aws:ec2/vpc:Vpc", "vpc-1", json!({ "cidrBlock": "10.0.0.0/16" }), ResourceOptions::new())
                .await?;
            let vpc = Arc::new(state);
            *sink.lock() = Some(Arc::clone(&vpc));
            Ok(vpc)
        }
    });

    vpc.apply(&ctx).await.unwrap();
    let response = vpc.get(&ctx).await.unwrap();

    let internal = produced.lock().clone().unwrap();
    assert!(Arc::ptr_eq(&response.component, &internal));
    assert_eq!(engine.registration_count("vpc-1"), 1);
}

#[tokio::test]
async fn test_chained_components_construct_each_resource_once() {
    let engine = MockEngine::new("shop", "test");
    let ctx = DeployContext::new("shop", "test", Arc::new(engine.clone()));

    let vpc = Component::with_meta(Meta::new("vpc"), |ctx, name| async move {
        ctx.register_resource("aws:ec2/vpc:Vpc", &name, json!({}), ResourceOptions::new())
            .await
    });

    let subnets: Vec<Component<ResourceState>> = ["a", "b", "c"]
        .into_iter()
        .map(|suffix| {
            let vpc = vpc.clone();
            Component::with_meta(Meta::new("vpc").child(suffix), move |ctx, name| {
                let vpc = vpc.clone();
                async move {
                    let parent = vpc.get(&ctx).await?;
                    ctx.register_resource(
                        "aws:ec2/subnet:Subnet",
                        &name,
                        json!({ "vpcId": parent.component.id.clone() }),
                        ResourceOptions::new().depends_on(&parent.component),
                    )
                    .await
                }
            })
        })
        .collect();

    for subnet in &subnets {
        subnet.apply(&ctx).await.unwrap();
    }

    assert_eq!(engine.registration_count("vpc"), 1);
    assert_eq!(engine.resources_of_type("aws:ec2/subnet:Subnet").len(), 3);
    let subnet = engine.resource("vpc-b").unwrap();
    assert_eq!(subnet.output_str("vpcId"), Some("vpc_id"));
}
