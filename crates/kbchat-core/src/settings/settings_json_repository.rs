use std::path::{Path, PathBuf};

use tracing::debug;

use super::client_settings::ClientSettings;
use super::settings_repository::{SettingsError, SettingsRepository, SettingsResult};
use crate::services::BoxFuture;

/// Settings stored as pretty-printed JSON.
pub struct JsonSettingsRepository {
    file_path: PathBuf,
}

impl JsonSettingsRepository {
    /// Create repository with XDG-compliant path
    pub fn new() -> SettingsResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SettingsError::Path("Cannot determine config directory".into()))?;

        Ok(Self::with_path(config_dir.join("kbchat").join("settings.json")))
    }

    pub fn with_path(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl SettingsRepository for JsonSettingsRepository {
    fn load(&self) -> BoxFuture<'static, SettingsResult<ClientSettings>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let exists = tokio::fs::try_exists(&path)
                .await
                .map_err(|e| SettingsError::Io(e.to_string()))?;

            if !exists {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(ClientSettings::default());
            }

            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| SettingsError::Io(e.to_string()))?;

            serde_json::from_str(&contents).map_err(|e| SettingsError::Serialization(e.to_string()))
        })
    }

    fn save(&self, settings: ClientSettings) -> BoxFuture<'static, SettingsResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let json = serde_json::to_string_pretty(&settings)
                .map_err(|e| SettingsError::Serialization(e.to_string()))?;

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SettingsError::Io(e.to_string()))?;
            }

            // Write atomically using temp file + rename
            let temp_path = path.with_extension("json.tmp");
            tokio::fs::write(&temp_path, &json)
                .await
                .map_err(|e| SettingsError::Io(e.to_string()))?;
            tokio::fs::rename(&temp_path, &path)
                .await
                .map_err(|e| SettingsError::Io(e.to_string()))?;

            debug!(path = %path.display(), "Settings saved");
            Ok(())
        })
    }
}
