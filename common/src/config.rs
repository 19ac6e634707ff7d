use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::SettingsError, types::PrinterEvent};

pub const MIN_DELAY_OFF_MINUTES: u32 = 1;
pub const MAX_DELAY_OFF_MINUTES: u32 = 1_440;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventAction {
    #[default]
    #[serde(rename = "na")]
    Nothing,
    #[serde(rename = "on")]
    TurnOn,
    #[serde(rename = "off")]
    TurnOff,
    #[serde(rename = "delay")]
    DelayOff,
}

impl EventAction {
    pub const ALL: [EventAction; 4] = [
        EventAction::Nothing,
        EventAction::TurnOn,
        EventAction::TurnOff,
        EventAction::DelayOff,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nothing => "na",
            Self::TurnOn => "on",
            Self::TurnOff => "off",
            Self::DelayOff => "delay",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Nothing => "Nothing",
            Self::TurnOn => "Turn Light On",
            Self::TurnOff => "Turn Light Off",
            Self::DelayOff => "Delay Turn Light Off",
        }
    }
}

impl FromStr for EventAction {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| SettingsError::UnknownEventAction(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightSettings {
    pub on_command: String,
    pub off_command: String,
    pub status_command: String,
    pub inverted_output: bool,
    pub delay_off: u32,
    pub event_printer_start: EventAction,
    pub event_printer_done: EventAction,
    pub event_printer_failed: EventAction,
    pub event_printer_cancelled: EventAction,
    pub event_printer_paused: EventAction,
    pub event_printer_error: EventAction,
}

impl Default for LightSettings {
    fn default() -> Self {
        Self {
            on_command: String::new(),
            off_command: String::new(),
            status_command: String::new(),
            inverted_output: false,
            delay_off: 5,
            event_printer_start: EventAction::Nothing,
            event_printer_done: EventAction::Nothing,
            event_printer_failed: EventAction::Nothing,
            event_printer_cancelled: EventAction::Nothing,
            event_printer_paused: EventAction::Nothing,
            event_printer_error: EventAction::Nothing,
        }
    }
}

impl LightSettings {
    pub fn sanitize(&mut self) {
        for command in [
            &mut self.on_command,
            &mut self.off_command,
            &mut self.status_command,
        ] {
            let trimmed = command.trim();
            if trimmed.len() != command.len() {
                *command = trimmed.to_string();
            }
        }

        self.delay_off = self
            .delay_off
            .clamp(MIN_DELAY_OFF_MINUTES, MAX_DELAY_OFF_MINUTES);
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_DELAY_OFF_MINUTES..=MAX_DELAY_OFF_MINUTES).contains(&self.delay_off) {
            return Err(SettingsError::DelayOutOfRange(self.delay_off));
        }
        Ok(())
    }

    /// Configured reaction to a monitored print event. `ClientOpened` has no setting.
    pub fn action_for(&self, event: PrinterEvent) -> Option<EventAction> {
        match event {
            PrinterEvent::PrintStarted => Some(self.event_printer_start),
            PrinterEvent::PrintDone => Some(self.event_printer_done),
            PrinterEvent::PrintFailed => Some(self.event_printer_failed),
            PrinterEvent::PrintCancelled => Some(self.event_printer_cancelled),
            PrinterEvent::PrintPaused => Some(self.event_printer_paused),
            PrinterEvent::Error => Some(self.event_printer_error),
            PrinterEvent::ClientOpened => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub shell: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            poll_interval_ms: 100,
            max_polls: 600,
        }
    }
}

impl CommandConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        self.poll_interval() * self.max_polls
    }

    pub fn sanitize(&mut self) {
        if self.shell.trim().is_empty() {
            self.shell = "/bin/sh".to_string();
        }
        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 5_000);
        self.max_polls = self.max_polls.max(1);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub event_topic_prefix: String,
    pub plugin_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            event_topic_prefix: "octoPrint/event/".to_string(),
            plugin_topic: "octoPrint/plugin/octolight".to_string(),
        }
    }
}

impl MqttConfig {
    pub fn sanitize(&mut self) {
        if !self.event_topic_prefix.ends_with('/') {
            self.event_topic_prefix.push('/');
        }
        while self.plugin_topic.ends_with('/') {
            self.plugin_topic.pop();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub settings: LightSettings,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_port() -> u16 {
    5000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            settings: LightSettings::default(),
            command: CommandConfig::default(),
            mqtt: MqttConfig::default(),
            http_port: default_http_port(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.settings.sanitize();
        self.command.sanitize();
        self.mqtt.sanitize();
    }
}
