use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::EventAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrinterEvent {
    ClientOpened,
    PrintStarted,
    PrintDone,
    PrintFailed,
    PrintCancelled,
    PrintPaused,
    Error,
}

impl PrinterEvent {
    pub const MONITORED: [PrinterEvent; 6] = [
        PrinterEvent::PrintStarted,
        PrinterEvent::PrintDone,
        PrinterEvent::PrintFailed,
        PrinterEvent::PrintCancelled,
        PrinterEvent::PrintPaused,
        PrinterEvent::Error,
    ];

    /// Event names as the host emits them on its event bus.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ClientOpened" => Some(Self::ClientOpened),
            "PrintStarted" => Some(Self::PrintStarted),
            "PrintDone" => Some(Self::PrintDone),
            "PrintFailed" => Some(Self::PrintFailed),
            "PrintCancelled" => Some(Self::PrintCancelled),
            "PrintPaused" => Some(Self::PrintPaused),
            "Error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientOpened => "ClientOpened",
            Self::PrintStarted => "PrintStarted",
            Self::PrintDone => "PrintDone",
            Self::PrintFailed => "PrintFailed",
            Self::PrintCancelled => "PrintCancelled",
            Self::PrintPaused => "PrintPaused",
            Self::Error => "Error",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ClientOpened => "Client Opened:",
            Self::PrintStarted => "Printer Start:",
            Self::PrintDone => "Printer Done:",
            Self::PrintFailed => "Printer Failed:",
            Self::PrintCancelled => "Printer Cancelled:",
            Self::PrintPaused => "Printer Paused:",
            Self::Error => "Printer Error:",
        }
    }

    pub fn setting_name(self) -> Option<&'static str> {
        match self {
            Self::ClientOpened => None,
            Self::PrintStarted => Some("event_printer_start"),
            Self::PrintDone => Some("event_printer_done"),
            Self::PrintFailed => Some("event_printer_failed"),
            Self::PrintCancelled => Some("event_printer_cancelled"),
            Self::PrintPaused => Some("event_printer_paused"),
            Self::Error => Some("event_printer_error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightAction {
    Toggle,
    GetState,
    TurnOn,
    TurnOff,
    DelayOff,
    DelayOffStop,
}

impl LightAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::GetState => "getState",
            Self::TurnOn => "turnOn",
            Self::TurnOff => "turnOff",
            Self::DelayOff => "delayOff",
            Self::DelayOffStop => "delayOffStop",
        }
    }

    /// A request without an action toggles the light.
    pub fn from_query(action: Option<&str>) -> Option<Self> {
        match action {
            None => Some(Self::Toggle),
            Some(value) => value.parse().ok(),
        }
    }
}

impl FromStr for LightAction {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "toggle" => Ok(Self::Toggle),
            "getState" => Ok(Self::GetState),
            "turnOn" => Ok(Self::TurnOn),
            "turnOff" => Ok(Self::TurnOff),
            "delayOff" => Ok(Self::DelayOff),
            "delayOffStop" => Ok(Self::DelayOffStop),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightStateResponse {
    pub state: bool,
    #[serde(
        rename = "delayOffAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_off_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightMessage {
    #[serde(rename = "isLightOn")]
    pub is_light_on: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventOption {
    pub name: &'static str,
    pub value: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoredEvent {
    pub label: &'static str,
    #[serde(rename = "settingName")]
    pub setting_name: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsOptions {
    pub event_options: Vec<EventOption>,
    pub monitored_events: Vec<MonitoredEvent>,
}

pub fn settings_options() -> SettingsOptions {
    SettingsOptions {
        event_options: EventAction::ALL
            .into_iter()
            .map(|action| EventOption {
                name: action.display_name(),
                value: action.as_str(),
            })
            .collect(),
        monitored_events: PrinterEvent::MONITORED
            .into_iter()
            .filter_map(|event| {
                event.setting_name().map(|setting_name| MonitoredEvent {
                    label: event.label(),
                    setting_name,
                })
            })
            .collect(),
    }
}
