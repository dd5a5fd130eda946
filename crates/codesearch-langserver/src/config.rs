//! Launcher configuration loading from YAML files

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LaunchError, Result};
use crate::types::ServerOptions;

/// Per-language launcher configuration keyed by language identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherSettings {
    #[serde(default)]
    pub languages: HashMap<String, ServerOptions>,
}

/// Loads and validates launcher settings
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from a YAML file
    pub fn load_from_file(path: &Path) -> Result<LauncherSettings> {
        debug!(path = %path.display(), "loading launcher settings");

        let content = std::fs::read_to_string(path).map_err(|err| {
            LaunchError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                err
            ))
        })?;

        Self::load_from_string(&content)
    }

    /// Load settings from a YAML string
    pub fn load_from_string(content: &str) -> Result<LauncherSettings> {
        let settings: LauncherSettings = serde_yaml::from_str(content)
            .map_err(|err| LaunchError::Config(format!("failed to parse YAML: {}", err)))?;

        Self::validate(&settings)?;

        info!(
            languages = settings.languages.len(),
            "launcher settings loaded"
        );
        Ok(settings)
    }

    /// Reject settings a launcher could not act on
    fn validate(settings: &LauncherSettings) -> Result<()> {
        for (language, options) in &settings.languages {
            if !options.detach && options.install_path.as_os_str().is_empty() {
                return Err(LaunchError::Config(format!(
                    "language '{}' has no install_path",
                    language
                )));
            }
            if options.max_workspaces == 0 {
                return Err(LaunchError::Config(format!(
                    "language '{}' has max_workspaces 0",
                    language
                )));
            }
            if options.request_timeout_ms == 0 {
                return Err(LaunchError::Config(format!(
                    "language '{}' has request_timeout_ms 0",
                    language
                )));
            }
            if options.connect_attempts == 0 {
                return Err(LaunchError::Config(format!(
                    "language '{}' has connect_attempts 0",
                    language
                )));
            }
        }
        Ok(())
    }

    /// Layer settings: built-in defaults, then the user file, then runtime
    /// overrides; later layers win per language.
    pub fn merge_settings(
        runtime: Option<LauncherSettings>,
        user: Option<LauncherSettings>,
        builtin: LauncherSettings,
    ) -> LauncherSettings {
        let mut merged = builtin;

        if let Some(user) = user {
            for (language, options) in user.languages {
                merged.languages.insert(language, options);
            }
        }
        if let Some(runtime) = runtime {
            for (language, options) in runtime.languages {
                merged.languages.insert(language, options);
            }
        }

        merged
    }
}
