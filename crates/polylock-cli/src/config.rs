use polylock_schema::MetadataOption;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// User defaults, read from `~/.config/polylock/config.json` unless
/// `--config` names another file. Command-line flags always win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Platforms to use in place of each manifest's own when `--platform` is not given.
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub category_priority: Vec<String>,
    /// JSON conda/PyPI name-mapping table.
    #[serde(default)]
    pub name_mapping: Option<PathBuf>,
    /// `pypi name -> conda name` pairs applied on top of the mapping table.
    #[serde(default)]
    pub name_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: Vec<MetadataOption>,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
}

impl CliConfig {
    /// Load `explicit` if given, otherwise the default file if it exists.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, String> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("config error: {}: {e}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("config error: {}: {e}", path.display()))
    }
}

fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/polylock/config.json"))
}
