use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{FamilyWebError, Result};
use crate::resolution::ResolverOptions;

/// Name of the configuration file stored inside the `.familyweb` directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the hidden directory used to store family-web state.
pub const FAMILYWEB_DIR: &str = ".familyweb";

/// Configuration for a family-web workspace.
///
/// Controls resolution policy, parallelism and where the network cache lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Schema version of the configuration.
    pub version: u32,
    /// Cache file name, relative to the `.familyweb` directory.
    pub cache_file: String,
    /// Upper bound on concurrent reference lookups within one stage.
    pub max_parallel_resolutions: usize,
    /// Whether an explicit reference that fails validation falls back to one
    /// corpus-wide birth-date search before being reported unresolved.
    pub fallback_search_on_mismatch: bool,
    /// Whether corroborated matches may teach new name equivalences.
    pub learn_name_equivalences: bool,
    /// Searches hitting more candidates than this are reported ambiguous.
    pub max_search_candidates: usize,
    /// Name equivalence classes added on top of the built-in ones.
    pub extra_name_classes: Vec<Vec<String>>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            version: 1,
            cache_file: "networks.json".to_string(),
            max_parallel_resolutions: 4,
            fallback_search_on_mismatch: true,
            learn_name_equivalences: true,
            max_search_candidates: 25,
            extra_name_classes: Vec::new(),
        }
    }
}

impl WebConfig {
    /// The resolver options this configuration implies.
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            fallback_search_on_mismatch: self.fallback_search_on_mismatch,
            learn_names: self.learn_name_equivalences,
            max_search_candidates: self.max_search_candidates,
        }
    }
}

/// Returns the path to the `.familyweb` directory within the given root.
pub fn get_familyweb_dir(root: &Path) -> PathBuf {
    root.join(FAMILYWEB_DIR)
}

/// Returns the path to the configuration file within the `.familyweb` directory.
pub fn get_config_path(root: &Path) -> PathBuf {
    get_familyweb_dir(root).join(CONFIG_FILENAME)
}

/// Returns the path of the network cache file for a configuration.
pub fn get_cache_path(root: &Path, config: &WebConfig) -> PathBuf {
    get_familyweb_dir(root).join(&config.cache_file)
}

/// Loads the configuration from disk.
///
/// If the configuration file does not exist, returns the default
/// configuration.
pub fn load_config(root: &Path) -> Result<WebConfig> {
    let config_path = get_config_path(root);

    if !config_path.exists() {
        return Ok(WebConfig::default());
    }

    let contents = fs::read_to_string(&config_path).map_err(|e| FamilyWebError::Config {
        message: format!(
            "failed to read config file '{}': {}",
            config_path.display(),
            e
        ),
    })?;

    let config: WebConfig =
        serde_json::from_str(&contents).map_err(|e| FamilyWebError::Config {
            message: format!(
                "failed to parse config file '{}': {}",
                config_path.display(),
                e
            ),
        })?;

    if config.max_parallel_resolutions == 0 {
        return Err(FamilyWebError::Config {
            message: "max_parallel_resolutions must be at least 1".to_string(),
        });
    }

    Ok(config)
}

/// Saves the configuration to disk using an atomic write.
///
/// Writes to a temporary file first and then renames it to the final location.
pub fn save_config(root: &Path, config: &WebConfig) -> Result<()> {
    let dir = get_familyweb_dir(root);
    fs::create_dir_all(&dir).map_err(|e| FamilyWebError::Config {
        message: format!("failed to create directory '{}': {}", dir.display(), e),
    })?;

    let config_path = get_config_path(root);
    let tmp_path = config_path.with_extension("tmp");

    let json = serde_json::to_string_pretty(config).map_err(|e| FamilyWebError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&tmp_path, &json).map_err(|e| FamilyWebError::Config {
        message: format!(
            "failed to write temporary config file '{}': {}",
            tmp_path.display(),
            e
        ),
    })?;

    fs::rename(&tmp_path, &config_path).map_err(|e| FamilyWebError::Config {
        message: format!(
            "failed to rename temporary config file '{}' to '{}': {}",
            tmp_path.display(),
            config_path.display(),
            e
        ),
    })?;

    Ok(())
}
