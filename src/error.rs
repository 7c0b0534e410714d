use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::reconcile::Domain;

/// Failure reported by a database driver.
pub type DbError = Box<dyn std::error::Error + Send + Sync>;

/// Failures while reading the spec file and resolving its templates.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to open file '{}': {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(
        "required environment variable(s) not found while loading '{}': {}",
        .path.display(),
        .names.join(", ")
    )]
    MissingEnvVars { path: PathBuf, names: Vec<String> },
}

/// A single field-level problem in the spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub role: String,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(role: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "role={} field={}: {}", self.role, self.field, self.message)
    }
}

/// The catalog could not be read.
#[derive(Debug, Error)]
#[error("failed to read {what} from the catalog: {source}")]
pub struct CatalogError {
    pub what: &'static str,
    #[source]
    pub source: postgres::Error,
}

/// A reconciler refused to plan a role, usually because of a malformed directive.
#[derive(Debug, Error)]
#[error("{domain}: role {role}: {message}")]
pub struct AnalyzeError {
    pub domain: Domain,
    pub role: String,
    pub message: String,
}

impl AnalyzeError {
    pub fn new(domain: Domain, role: &str, message: impl Into<String>) -> Self {
        Self {
            domain,
            role: role.to_string(),
            message: message.into(),
        }
    }
}

/// A statement failed inside the run transaction. `statement` is the redacted form and
/// `message` has already been scrubbed of secrets.
#[derive(Debug, Error)]
#[error("failed to execute `{statement}`: {message}")]
pub struct ExecutionError {
    pub statement: String,
    pub message: String,
}

/// Everything that can stop a `configure` run.
#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error("invalid options: {0}")]
    Options(&'static str),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("spec failed validation:\n{}", render_validation(.0))]
    Validation(Vec<ValidationError>),

    #[error("could not connect to the database: {0}")]
    Connect(#[source] DbError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error("{0}; transaction rolled back, no changes were made")]
    Execution(#[source] ExecutionError),

    #[error("transaction control failed: {0}")]
    Transaction(#[source] DbError),
}

fn render_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_format() {
        let err = ValidationError::new("fred", "attribute", "unknown field");
        assert_eq!(err.to_string(), "role=fred field=attribute: unknown field");
    }

    #[test]
    fn test_validation_errors_render_one_per_line() {
        let err = ConfigureError::Validation(vec![
            ValidationError::new("fred", "attribute", "unknown field"),
            ValidationError::new("mark", "can_login", "must be a boolean"),
        ]);
        let text = err.to_string();

        assert!(text.contains("role=fred field=attribute: unknown field\n"));
        assert!(text.ends_with("role=mark field=can_login: must be a boolean"));
    }

    #[test]
    fn test_missing_env_vars_lists_every_name() {
        let err = LoadError::MissingEnvVars {
            path: PathBuf::from("spec.yml"),
            names: vec!["A".to_string(), "B".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("spec.yml"));
        assert!(text.contains("A, B"));
    }
}
