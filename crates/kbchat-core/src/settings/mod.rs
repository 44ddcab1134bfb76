pub mod client_settings;
pub mod settings_json_repository;
pub mod settings_repository;

pub use client_settings::ClientSettings;
pub use settings_json_repository::JsonSettingsRepository;
pub use settings_repository::{SettingsError, SettingsRepository, SettingsResult};
