use thiserror::Error;

use super::client_settings::ClientSettings;
use crate::services::BoxFuture;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Path error: {0}")]
    Path(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub trait SettingsRepository: Send + Sync + 'static {
    /// Load settings from storage, or defaults if nothing was saved yet
    fn load(&self) -> BoxFuture<'static, SettingsResult<ClientSettings>>;

    /// Save settings to storage
    fn save(&self, settings: ClientSettings) -> BoxFuture<'static, SettingsResult<()>>;
}
