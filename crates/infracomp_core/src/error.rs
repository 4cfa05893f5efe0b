//! Error types for the core module.

use infracomp_engine::EngineError;
use thiserror::Error;

/// Result type alias for core operations.
pub type CompResult<T> = Result<T, CompError>;

/// Errors that can occur while resolving or constructing components.
#[derive(Error, Debug)]
pub enum CompError {
    #[error("Component name must not be empty")]
    EmptyName,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Component '{name}' failed: {source}")]
    Component {
        name: String,
        source: Box<CompError>,
    },

    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("{kind} lookup name '{key}' not found")]
    LookupNotFound { kind: String, key: String },

    #[error("Component '{name}' is registered as {registered}, requested as {requested}")]
    TypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("Duplicate build step: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Dependency cycle detected at step '{0}'")]
    DependencyCycle(String),

    #[error("{}", join_messages(.0))]
    Aggregate(Vec<CompError>),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn join_messages(errors: &[CompError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl CompError {
    pub fn construction(message: impl Into<String>) -> Self {
        Self::Construction(message.into())
    }

    pub fn lookup(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::LookupNotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Attach the failing component's name.
    pub fn in_component(self, name: impl Into<String>) -> Self {
        Self::Component {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Join independent failures into one error.
    ///
    /// Nested aggregates are flattened. Returns `None` when there is nothing
    /// to report and the single error itself when there is only one.
    pub fn join(errors: impl IntoIterator<Item = CompError>) -> Option<CompError> {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                CompError::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(CompError::Aggregate(flat)),
        }
    }

    /// The innermost error, with component-name wrappers stripped.
    pub fn root_cause(&self) -> &CompError {
        let mut current = self;
        while let CompError::Component { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Names of the components this error passed through, outermost first.
    pub fn component_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        while let CompError::Component { name, source } = current {
            path.push(name.as_str());
            current = source.as_ref();
        }
        path
    }

    /// Number of independent failures carried by this error.
    pub fn failure_count(&self) -> usize {
        match self.root_cause() {
            CompError::Aggregate(errors) => errors.iter().map(CompError::failure_count).sum(),
            _ => 1,
        }
    }

    /// Configuration errors are raised while resolving names, patterns and
    /// plans, before anything is constructed.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.root_cause(),
            CompError::EmptyName
                | CompError::InvalidConfig(_)
                | CompError::InvalidPattern { .. }
                | CompError::TypeMismatch { .. }
                | CompError::DuplicateStep(_)
                | CompError::UnknownDependency { .. }
                | CompError::DependencyCycle(_)
        )
    }
}

/// Collect the failures of independent sibling steps.
///
/// Every result is inspected; all errors are reported together.
pub fn join_results(results: impl IntoIterator<Item = CompResult<()>>) -> CompResult<()> {
    match CompError::join(results.into_iter().filter_map(Result::err)) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_none_single_many() {
        assert!(CompError::join(Vec::new()).is_none());

        let single = CompError::join(vec![CompError::EmptyName]).unwrap();
        assert!(matches!(single, CompError::EmptyName));

        let many = CompError::join(vec![
            CompError::lookup("Target group", "web80"),
            CompError::Aggregate(vec![
                CompError::construction("boom"),
                CompError::construction("bang"),
            ]),
        ])
        .unwrap();
        match &many {
            CompError::Aggregate(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected aggregate, got {other:?}"),
        }
        assert_eq!(many.failure_count(), 3);
        assert_eq!(
            many.to_string(),
            "Target group lookup name 'web80' not found\nConstruction failed: boom\nConstruction failed: bang"
        );
    }

    #[test]
    fn test_join_results() {
        assert!(join_results(vec![Ok(()), Ok(())]).is_ok());
        let err = join_results(vec![
            Ok(()),
            Err(CompError::construction("a")),
            Err(CompError::construction("b")),
        ])
        .unwrap_err();
        assert_eq!(err.failure_count(), 2);
    }

    #[test]
    fn test_root_cause_and_path() {
        let err = CompError::construction("boom")
            .in_component("subnet-a")
            .in_component("vpc");

        assert_eq!(err.component_path(), vec!["vpc", "subnet-a"]);
        assert!(matches!(err.root_cause(), CompError::Construction(m) if m == "boom"));
        assert_eq!(
            err.to_string(),
            "Component 'vpc' failed: Component 'subnet-a' failed: Construction failed: boom"
        );
    }

    #[test]
    fn test_configuration_classification() {
        assert!(CompError::EmptyName.in_component("x").is_configuration_error());
        assert!(CompError::DependencyCycle("a".into()).is_configuration_error());
        assert!(!CompError::construction("x").is_configuration_error());
        assert!(!CompError::lookup("Certificate", "c").is_configuration_error());
    }
}
