use crate::{
    config::{EventAction, LightSettings},
    types::PrinterEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    /// A UI client connected and needs the current state.
    NotifyState,
    Apply(EventAction),
    Ignore,
}

pub fn respond_to(event: PrinterEvent, settings: &LightSettings) -> EventResponse {
    if event == PrinterEvent::ClientOpened {
        return EventResponse::NotifyState;
    }

    match settings.action_for(event) {
        Some(EventAction::Nothing) | None => EventResponse::Ignore,
        Some(action) => EventResponse::Apply(action),
    }
}
