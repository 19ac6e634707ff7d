pub mod config;
pub mod error;
pub mod events;
pub mod topics;
pub mod types;

pub use config::{CommandConfig, EventAction, LightSettings, MqttConfig, RuntimeConfig};
pub use error::SettingsError;
pub use events::{respond_to, EventResponse};
pub use topics::*;
pub use types::{
    settings_options, ErrorBody, LightAction, LightMessage, LightStateResponse, PrinterEvent,
    SettingsOptions,
};
