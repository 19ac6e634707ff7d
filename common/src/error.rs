use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown event action '{0}' (expected na, on, off or delay)")]
    UnknownEventAction(String),
    #[error("delay_off must be between 1 and 1440 minutes, got {0}")]
    DelayOutOfRange(u32),
}
