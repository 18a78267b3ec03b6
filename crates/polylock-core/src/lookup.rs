//! Translation between conda and PyPI package names.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("failed to read name mapping: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse name mapping: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Maps names between the two package ecosystems.
pub trait NameMapper: Send + Sync {
    fn conda_to_pypi(&self, name: &str) -> String;
    fn pypi_to_conda(&self, name: &str) -> String;
}

/// Lowercase and collapse runs of `-`, `_` and `.` into a single `-`.
pub fn canonicalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MappingEntry {
    pub conda_name: String,
    pub pypi_name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MappingValue {
    CondaName(String),
    Entry(MappingEntry),
}

/// PyPI-keyed name table: a base mapping plus local overrides.
///
/// The reverse (conda to PyPI) table is built on first use and discarded
/// whenever the overrides change.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    base: BTreeMap<String, MappingEntry>,
    overrides: BTreeMap<String, MappingEntry>,
    reverse: OnceLock<BTreeMap<String, String>>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a base mapping from JSON: `{"<pypi name>": "<conda name>"}` or
    /// `{"<pypi name>": {"conda_name": ..., "pypi_name": ...}}`.
    pub fn from_json_str(input: &str) -> Result<Self, LookupError> {
        let raw: BTreeMap<String, MappingValue> = serde_json::from_str(input)?;
        Ok(Self {
            base: normalize_entries(raw),
            ..Self::default()
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let table = Self::from_json_str(&fs::read_to_string(path)?)?;
        debug!("loaded {} name mappings from {}", table.base.len(), path.display());
        Ok(table)
    }

    /// Replace the local overrides with plain `pypi name -> conda name` pairs.
    pub fn set_overrides<I, K, V>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.overrides = normalize_entries(
            overrides
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_owned(), MappingValue::CondaName(v.into()))),
        );
        self.reverse = OnceLock::new();
    }

    fn forward(&self, pypi_name: &str) -> Option<&MappingEntry> {
        self.overrides
            .get(pypi_name)
            .or_else(|| self.base.get(pypi_name))
    }

    fn reverse(&self) -> &BTreeMap<String, String> {
        self.reverse.get_or_init(|| {
            self.base
                .values()
                .chain(self.overrides.values())
                .map(|e| (e.conda_name.clone(), e.pypi_name.clone()))
                .collect()
        })
    }
}

fn normalize_entries<I>(raw: I) -> BTreeMap<String, MappingEntry>
where
    I: IntoIterator<Item = (String, MappingValue)>,
{
    raw.into_iter()
        .map(|(pypi, value)| {
            let key = canonicalize_name(&pypi);
            let entry = match value {
                MappingValue::CondaName(conda_name) => MappingEntry {
                    conda_name,
                    pypi_name: key.clone(),
                },
                MappingValue::Entry(entry) => MappingEntry {
                    conda_name: entry.conda_name,
                    pypi_name: canonicalize_name(&entry.pypi_name),
                },
            };
            (key, entry)
        })
        .collect()
}

impl NameMapper for MappingTable {
    fn conda_to_pypi(&self, name: &str) -> String {
        let cname = canonicalize_name(name);
        self.reverse().get(&cname).cloned().unwrap_or(cname)
    }

    fn pypi_to_conda(&self, name: &str) -> String {
        let cname = canonicalize_name(name);
        self.forward(&cname)
            .map_or(cname, |entry| entry.conda_name.clone())
    }
}
