//! Local presets laid over every applied document
//!
//! `<home>/dns.yaml` contributes its `dns` section and `<home>/general.yaml`
//! its top-level settings (ports, mode, log level, controller address).
//! Either file may be missing. Proxy and rule sections are never taken from
//! `general.yaml`, so a preset cannot replace what the subscription provides.

use serde_yaml::{Mapping, Value};
use std::io;
use std::path::Path;

use crate::config::Home;
use crate::utils::error::ApplyError;

const DNS_KEY: &str = "dns";

/// Sections that always come from the subscription
const CONTENT_SECTIONS: [&str; 6] = [
    "proxies",
    "proxy-groups",
    "proxy-providers",
    "rules",
    "rule-providers",
    DNS_KEY,
];

/// Overrides read from the home directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presets {
    dns: Option<Value>,
    general: Mapping,
}

impl Presets {
    /// Read `dns.yaml` and `general.yaml` from `home`
    pub fn load(home: &Home) -> Result<Self, ApplyError> {
        let dns = read_mapping(&home.dns_preset_file())?;
        let general = read_mapping(&home.general_preset_file())?;
        Ok(Self::from_mappings(dns, general))
    }

    /// Build presets from already parsed preset documents
    pub fn from_mappings(dns: Option<Mapping>, general: Option<Mapping>) -> Self {
        let dns = dns
            .and_then(|mut document| document.remove(DNS_KEY))
            .filter(|section| !section.is_null());

        let general = general
            .map(|document| {
                document
                    .into_iter()
                    .filter(|(key, _)| {
                        !key.as_str()
                            .is_some_and(|key| CONTENT_SECTIONS.contains(&key))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { dns, general }
    }

    /// Whether applying these presets would change nothing
    pub fn is_empty(&self) -> bool {
        self.dns.is_none() && self.general.is_empty()
    }

    /// Replace the preset keys of `document`
    pub fn overlay(&self, document: &mut Mapping) {
        for (key, value) in &self.general {
            document.insert(key.clone(), value.clone());
        }
        if let Some(dns) = &self.dns {
            document.insert(Value::from(DNS_KEY), dns.clone());
        }
    }

    /// Write `active` with the presets laid over it to `output`
    pub async fn render(&self, active: &Path, output: &Path) -> Result<(), ApplyError> {
        let text = tokio::fs::read_to_string(active)
            .await
            .map_err(|source| io_error(active, source))?;
        let mut document = parse_mapping(active, &text)?.unwrap_or_default();
        self.overlay(&mut document);

        let rendered = serde_yaml::to_string(&document).map_err(|e| ApplyError::Document {
            path: output.to_path_buf(),
            reason: e.to_string(),
        })?;

        // readers of `output` see the old or the new document, never a mix
        let temp = output.with_extension("yaml.tmp");
        tokio::fs::write(&temp, rendered)
            .await
            .map_err(|source| io_error(&temp, source))?;
        tokio::fs::rename(&temp, output)
            .await
            .map_err(|source| io_error(output, source))?;
        Ok(())
    }
}

fn io_error(path: &Path, source: io::Error) -> ApplyError {
    ApplyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Missing file means no preset
fn read_mapping(path: &Path) -> Result<Option<Mapping>, ApplyError> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_mapping(path, &text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error(path, source)),
    }
}

fn parse_mapping(path: &Path, text: &str) -> Result<Option<Mapping>, ApplyError> {
    let invalid = |reason: String| ApplyError::Document {
        path: path.to_path_buf(),
        reason,
    };

    match serde_yaml::from_str::<Value>(text).map_err(|e| invalid(e.to_string()))? {
        Value::Null => Ok(None),
        Value::Mapping(mapping) => Ok(Some(mapping)),
        _ => Err(invalid("top level is not a mapping".to_string())),
    }
}
