pub mod compositor;
pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_store;
