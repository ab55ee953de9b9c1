#![deny(unsafe_code)]

pub mod app;
pub mod chat;
pub mod settings;

pub use app::ChatApp;
pub use chat::{ChatSession, SessionError};
pub use settings::{ChatSettings, SettingsStore};
