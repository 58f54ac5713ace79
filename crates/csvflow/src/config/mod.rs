pub mod loader;
pub mod settings;

pub use loader::{load_settings, load_settings_from_str, validate_settings};
pub use settings::Settings;
