use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use octolight_common::{
    respond_to, EventAction, EventResponse, LightAction, LightMessage, LightSettings,
    LightStateResponse, PrinterEvent,
};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    notify::StateNotifier,
    shell::{CommandOutcome, CommandRunner},
};

struct PendingOff {
    generation: u64,
    deadline: Option<DateTime<Utc>>,
    task: JoinHandle<()>,
}

pub struct LightController {
    settings: RwLock<LightSettings>,
    runner: CommandRunner,
    notifier: Arc<dyn StateNotifier>,
    pending: Mutex<Option<PendingOff>>,
    generation: AtomicU64,
}

impl LightController {
    pub fn new(
        mut settings: LightSettings,
        runner: CommandRunner,
        notifier: Arc<dyn StateNotifier>,
    ) -> Self {
        settings.sanitize();
        Self {
            settings: RwLock::new(settings),
            runner,
            notifier,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn settings(&self) -> LightSettings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, mut settings: LightSettings) {
        settings.sanitize();
        *self.settings.write().await = settings;
    }

    pub async fn on_startup(&self) {
        let settings = self.settings().await;
        info!("--------------------------------------------");
        info!("OctoLight started, listening for GET request");
        info!(
            "Light on: '{}', Light off: '{}', Light status: '{}', Delay Time: {}",
            settings.on_command, settings.off_command, settings.status_command, settings.delay_off
        );
        info!("--------------------------------------------");

        let state = self.light_state().await;
        info!("After Startup. Light state: {state}");
        self.notify(state);
    }

    pub async fn shutdown(&self) {
        self.stop_timer().await;
    }

    /// Asks the status command; the light is never cached.
    pub async fn light_state(&self) -> bool {
        let settings = self.settings().await;
        match self.runner.run(&settings.status_command).await {
            Ok(CommandOutcome::Exited(Some(code))) => (code == 0) != settings.inverted_output,
            Ok(outcome) => {
                debug!(?outcome, "status command gave no usable exit code");
                false
            }
            Err(err) => {
                warn!("status command failed: {err}");
                false
            }
        }
    }

    /// Runs the on or off command. Turning off always clears a pending delayed off.
    pub async fn change_light_state(&self, on: bool) -> bool {
        let settings = self.settings().await;
        let command = if on {
            settings.on_command
        } else {
            self.stop_timer().await;
            settings.off_command
        };

        match self.runner.run(&command).await {
            Ok(outcome) => {
                if !outcome.success() {
                    warn!(on, ?outcome, "light command did not succeed");
                }
                outcome.success()
            }
            Err(err) => {
                warn!("light command failed: {err}");
                false
            }
        }
    }

    pub async fn toggle(&self) -> bool {
        self.stop_timer().await;

        let current = self.light_state().await;
        self.change_light_state(!current).await;

        let state = self.light_state().await;
        info!("Got request. Light state: {state}");
        self.notify(state);
        state
    }

    pub async fn turn_on(&self) -> bool {
        self.stop_timer().await;
        self.change_light_state(true).await;
        self.notify_current().await
    }

    pub async fn turn_off(&self) -> bool {
        self.change_light_state(false).await;
        self.notify_current().await
    }

    pub async fn delay_off(self: &Arc<Self>, minutes: u32) -> bool {
        self.delay_off_for(Duration::from_secs(u64::from(minutes) * 60))
            .await
    }

    /// Turns the light on and schedules it off after `duration`.
    pub async fn delay_off_for(self: &Arc<Self>, duration: Duration) -> bool {
        self.stop_timer().await;
        self.change_light_state(true).await;
        self.start_timer(duration).await;
        self.notify_current().await
    }

    pub async fn delay_off_stop(&self) -> bool {
        self.turn_off().await
    }

    pub async fn start_timer(self: &Arc<Self>, duration: Duration) {
        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.take() {
            info!("Stopping schedule");
            previous.task.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            controller.fire_delay_off(generation).await;
        });

        let deadline = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta));

        info!("Setting up schedule");
        info!("Time till shutoff: {} seconds", duration.as_secs());
        *pending = Some(PendingOff {
            generation,
            deadline,
            task,
        });
    }

    pub async fn stop_timer(&self) {
        if let Some(previous) = self.pending.lock().await.take() {
            info!("Stopping schedule");
            previous.task.abort();
        }
    }

    pub async fn pending_off_at(&self) -> Option<DateTime<Utc>> {
        self.pending
            .lock()
            .await
            .as_ref()
            .and_then(|pending| pending.deadline)
    }

    #[cfg(test)]
    pub async fn has_pending_off(&self) -> bool {
        self.pending.lock().await.is_some()
    }

    async fn fire_delay_off(&self, generation: u64) {
        {
            let mut pending = self.pending.lock().await;
            let owned = pending
                .as_ref()
                .is_some_and(|current| current.generation == generation);
            if !owned {
                return;
            }
            // Detach instead of aborting: this is the task currently running.
            pending.take();
        }

        info!("Delayed off elapsed, turning light off");
        self.turn_off().await;
    }

    pub async fn handle_action(
        self: &Arc<Self>,
        action: LightAction,
        delay: Option<u32>,
    ) -> LightStateResponse {
        let state = match action {
            LightAction::Toggle => self.toggle().await,
            LightAction::GetState => self.light_state().await,
            LightAction::TurnOn => self.turn_on().await,
            LightAction::TurnOff => self.turn_off().await,
            LightAction::DelayOff => {
                let minutes = match delay {
                    Some(minutes) => minutes,
                    None => self.settings.read().await.delay_off,
                };
                self.delay_off(minutes).await
            }
            LightAction::DelayOffStop => self.delay_off_stop().await,
        };

        LightStateResponse {
            state,
            delay_off_at: self.pending_off_at().await.map(|at| at.timestamp()),
        }
    }

    pub async fn handle_event(self: &Arc<Self>, event: PrinterEvent) {
        let settings = self.settings().await;
        match respond_to(event, &settings) {
            EventResponse::NotifyState => {
                self.notify_current().await;
            }
            EventResponse::Apply(EventAction::TurnOn) => {
                info!(event = event.as_str(), "turning light on");
                self.turn_on().await;
            }
            EventResponse::Apply(EventAction::TurnOff) => {
                info!(event = event.as_str(), "turning light off");
                self.turn_off().await;
            }
            EventResponse::Apply(EventAction::DelayOff) => {
                info!(
                    event = event.as_str(),
                    minutes = settings.delay_off,
                    "delaying light off"
                );
                self.delay_off(settings.delay_off).await;
            }
            EventResponse::Apply(EventAction::Nothing) | EventResponse::Ignore => {
                debug!(event = event.as_str(), "no light action configured");
            }
        }
    }

    async fn notify_current(&self) -> bool {
        let state = self.light_state().await;
        self.notify(state);
        state
    }

    fn notify(&self, is_light_on: bool) {
        self.notifier.notify(LightMessage { is_light_on });
    }
}
