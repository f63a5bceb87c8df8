//! Document validation gate
//!
//! A staged document must pass a [`DocumentValidator`] before it may replace
//! the active one. The updater only looks at success or failure.

use serde_yaml::Value;
use std::path::Path;

use crate::utils::error::ValidationError;

/// Checks a staged document before promotion
pub trait DocumentValidator: Send + Sync {
    /// Validate the file at `path`
    fn validate(&self, path: &Path) -> Result<(), ValidationError>;
}

/// Sections that must be YAML sequences when present
const SEQUENCE_SECTIONS: [&str; 3] = ["proxies", "proxy-groups", "rules"];

/// Sections that must be YAML mappings when present
const MAPPING_SECTIONS: [&str; 2] = ["proxy-providers", "rule-providers"];

/// Structural check of a proxy engine configuration document
///
/// The document must be a non-empty YAML mapping. The well-known list
/// sections must be sequences and the provider sections mappings. Anything
/// deeper is left to the proxy engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDocumentValidator;

impl YamlDocumentValidator {
    /// Validate document text
    pub fn validate_str(&self, content: &str) -> Result<(), ValidationError> {
        let document: Value = serde_yaml::from_str(content)?;

        let Value::Mapping(root) = document else {
            return Err(ValidationError::Rejected(format!(
                "expected a mapping at the top level, found {}",
                kind(&document)
            )));
        };

        if root.is_empty() {
            return Err(ValidationError::Rejected("document is empty".to_string()));
        }

        for section in SEQUENCE_SECTIONS {
            if let Some(value) = root.get(section) {
                if !value.is_sequence() && !value.is_null() {
                    return Err(ValidationError::Rejected(format!(
                        "'{section}' must be a list, found {}",
                        kind(value)
                    )));
                }
            }
        }

        for section in MAPPING_SECTIONS {
            if let Some(value) = root.get(section) {
                if !value.is_mapping() && !value.is_null() {
                    return Err(ValidationError::Rejected(format!(
                        "'{section}' must be a mapping, found {}",
                        kind(value)
                    )));
                }
            }
        }

        Ok(())
    }
}

impl DocumentValidator for YamlDocumentValidator {
    fn validate(&self, path: &Path) -> Result<(), ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ValidationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.validate_str(&content)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
