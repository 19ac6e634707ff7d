use std::{
    collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use octolight_common::{
    event_name_from_topic, event_subscription, plugin_state_topic, settings_options, ErrorBody,
    LightAction, LightSettings, PrinterEvent, RuntimeConfig,
};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::{
    net::TcpListener,
    sync::{
        mpsc::{self, error::TrySendError},
        Mutex,
    },
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::{
    light::LightController,
    notify::{MqttNotifier, StateNotifier},
    shell::CommandRunner,
};

const PLUGIN_API_PATH: &str = "/api/plugin/octolight";
const EVENT_QUEUE_DEPTH: usize = 32;

#[derive(Clone)]
struct AppState {
    controller: Arc<LightController>,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    let mut mqtt_options = MqttOptions::new(
        "octolight-controller-rust",
        runtime.mqtt.host.clone(),
        runtime.mqtt.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !runtime.mqtt.user.is_empty() {
        mqtt_options.set_credentials(runtime.mqtt.user.clone(), runtime.mqtt.pass.clone());
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let notifier: Arc<dyn StateNotifier> = Arc::new(MqttNotifier::new(
        mqtt.clone(),
        plugin_state_topic(&runtime.mqtt.plugin_topic),
    ));
    let controller = Arc::new(LightController::new(
        runtime.settings.clone(),
        CommandRunner::new(runtime.command.clone()),
        notifier,
    ));

    let events = spawn_event_worker(Arc::clone(&controller));
    spawn_mqtt_loop(
        mqtt.clone(),
        eventloop,
        runtime.mqtt.event_topic_prefix.clone(),
        events,
    );

    controller.on_startup().await;

    let app_state = AppState {
        controller: Arc::clone(&controller),
        store,
    };

    let web_root = std::env::var("OCTOLIGHT_WEB_ROOT")
        .unwrap_or_else(|_| format!("{}/web", env!("CARGO_MANIFEST_DIR")));
    let app = router(app_state, web_root);

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind octolight server at {addr}"))?;

    info!("octolight listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller.shutdown().await;
    info!("octolight stopped");
    Ok(())
}

fn router(app_state: AppState, web_root: String) -> Router {
    Router::new()
        .route(PLUGIN_API_PATH, get(handle_plugin_api))
        .route(
            "/api/settings",
            get(handle_get_settings).put(handle_put_settings),
        )
        .route("/api/settings/options", get(handle_get_settings_options))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state)
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.mqtt.host = host;
    }
    if let Some(port) = env_parse::<u16>("MQTT_PORT") {
        runtime.mqtt.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.mqtt.user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.mqtt.pass = pass;
    }
    if let Some(port) = env_parse::<u16>("OCTOLIGHT_HTTP_PORT") {
        runtime.http_port = port;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// Events are applied in arrival order. A full queue drops events rather than
// stalling the MQTT keep-alive.
fn spawn_event_worker(controller: Arc<LightController>) -> mpsc::Sender<PrinterEvent> {
    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            controller.handle_event(event).await;
        }
    });
    tx
}

fn spawn_mqtt_loop(
    mqtt: AsyncClient,
    mut eventloop: EventLoop,
    prefix: String,
    events: mpsc::Sender<PrinterEvent>,
) {
    let subscription = event_subscription(&prefix);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(incoming)) => {
                    handle_incoming(incoming, &mqtt, &prefix, &subscription, &events);
                }
                Ok(Event::Outgoing(_)) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn handle_incoming(
    incoming: Incoming,
    mqtt: &AsyncClient,
    prefix: &str,
    subscription: &str,
    events: &mpsc::Sender<PrinterEvent>,
) {
    match incoming {
        // Clean sessions lose their subscriptions on every reconnect.
        Incoming::ConnAck(_) => {
            info!("mqtt connected, subscribing to {subscription}");
            if let Err(err) = mqtt.try_subscribe(subscription, QoS::AtLeastOnce) {
                warn!("failed to subscribe to {subscription}: {err}");
            }
        }
        Incoming::Publish(message) => {
            let Some(event) = printer_event_from_topic(prefix, &message.topic) else {
                return;
            };
            debug!(event = event.as_str(), "printer event received");
            match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!("event queue full, dropping {}", event.as_str());
                }
                Err(TrySendError::Closed(event)) => {
                    warn!("event worker stopped, dropping {}", event.as_str());
                }
            }
        }
        _ => {}
    }
}

fn printer_event_from_topic(prefix: &str, topic: &str) -> Option<PrinterEvent> {
    event_name_from_topic(prefix, topic).and_then(PrinterEvent::from_name)
}

async fn handle_plugin_api(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(action) = LightAction::from_query(params.get("action").map(String::as_str)) else {
        return error_response(StatusCode::BAD_REQUEST, "action not recognized");
    };
    let delay = parse_delay(params.get("delay").map(String::as_str));

    let response = state.controller.handle_action(action, delay).await;
    debug!(action = action.as_str(), state = response.state, "handled light request");
    Json(response).into_response()
}

/// Unparseable delays fall back to the configured default.
fn parse_delay(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.settings().await)
}

async fn handle_put_settings(
    State(state): State<AppState>,
    payload: Result<Json<LightSettings>, JsonRejection>,
) -> impl IntoResponse {
    let Json(mut settings) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };
    if let Err(err) = settings.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }
    settings.sanitize();

    // A corrupt store is left alone so its other sections survive.
    let mut runtime = match state.store.load_runtime_config().await {
        Ok(runtime) => runtime,
        Err(err) => {
            warn!("failed to load existing runtime config for settings update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load stored runtime settings",
            );
        }
    };
    runtime.settings = settings.clone();

    if let Err(err) = state.store.save_runtime_config(&runtime).await {
        warn!("failed to persist settings update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist light settings",
        );
    }

    state.controller.update_settings(settings).await;
    info!("light settings updated");
    handle_get_settings(State(state)).await.into_response()
}

async fn handle_get_settings_options() -> impl IntoResponse {
    Json(settings_options())
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("OCTOLIGHT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.octolight"));
        Self::at(data_dir)
    }

    fn at(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid {}", self.runtime_path.display()))?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request},
    };
    use octolight_common::{CommandConfig, EventAction};
    use rumqttc::{ConnAck, ConnectReturnCode, Publish, Request as MqttRequest};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt as _;

    use super::*;
    use crate::notify::testing::RecordingNotifier;

    fn scratch_store() -> (TempDir, AppStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AppStore::at(dir.path().join("data"));
        (dir, store)
    }

    struct Harness {
        app: Router,
        controller: Arc<LightController>,
        store: AppStore,
        marker: PathBuf,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let (dir, store) = scratch_store();
        let marker = dir.path().join("on");
        let settings = LightSettings {
            on_command: format!("touch {}", marker.display()),
            off_command: format!("rm -f {}", marker.display()),
            status_command: format!("test -f {}", marker.display()),
            ..LightSettings::default()
        };
        let runner = CommandRunner::new(CommandConfig {
            poll_interval_ms: 10,
            max_polls: 500,
            ..CommandConfig::default()
        });
        let controller = Arc::new(LightController::new(
            settings,
            runner,
            Arc::new(RecordingNotifier::default()),
        ));
        let app = router(
            AppState {
                controller: Arc::clone(&controller),
                store: store.clone(),
            },
            dir.path().join("web").display().to_string(),
        );
        Harness {
            app,
            controller,
            store,
            marker,
            _dir: dir,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn put_settings_request(body: String) -> Request<Body> {
        Request::builder()
            .method(Method::PUT)
            .uri("/api/settings")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn delay_parameter_falls_back_on_garbage() {
        assert_eq!(parse_delay(Some("15")), Some(15));
        assert_eq!(parse_delay(Some(" 7 ")), Some(7));
        assert_eq!(parse_delay(Some("ten")), None);
        assert_eq!(parse_delay(Some("-3")), None);
        assert_eq!(parse_delay(None), None);
    }

    #[test]
    fn only_known_events_below_prefix_are_routed() {
        let prefix = "octoPrint/event/";
        assert_eq!(
            printer_event_from_topic(prefix, "octoPrint/event/PrintCancelled"),
            Some(PrinterEvent::PrintCancelled)
        );
        assert_eq!(
            printer_event_from_topic(prefix, "octoPrint/event/ZChange"),
            None
        );
        assert_eq!(
            printer_event_from_topic(prefix, "octoPrint/progress/printing"),
            None
        );
    }

    #[test]
    fn every_connack_resubscribes_to_events() {
        let (requests_tx, requests_rx) = flume::bounded(8);
        let mqtt = AsyncClient::from_senders(requests_tx);
        let (events, _events_rx) = mpsc::channel(1);
        let connack = || {
            Incoming::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::Success,
            })
        };

        for _ in 0..2 {
            handle_incoming(connack(), &mqtt, "octoPrint/event/", "octoPrint/event/+", &events);

            let Ok(MqttRequest::Subscribe(subscribe)) = requests_rx.try_recv() else {
                panic!("expected a subscribe request after ConnAck");
            };
            assert_eq!(subscribe.filters.len(), 1);
            assert_eq!(subscribe.filters[0].path, "octoPrint/event/+");
            assert_eq!(subscribe.filters[0].qos, QoS::AtLeastOnce);
        }
        assert!(requests_rx.try_recv().is_err());
    }

    #[test]
    fn full_event_queue_drops_instead_of_waiting() {
        let (requests_tx, _requests_rx) = flume::bounded(8);
        let mqtt = AsyncClient::from_senders(requests_tx);
        let (events, mut events_rx) = mpsc::channel(1);
        let publish = |topic: &str| Incoming::Publish(Publish::new(topic, QoS::AtMostOnce, ""));

        handle_incoming(
            publish("octoPrint/event/PrintStarted"),
            &mqtt,
            "octoPrint/event/",
            "octoPrint/event/+",
            &events,
        );
        handle_incoming(
            publish("octoPrint/event/PrintDone"),
            &mqtt,
            "octoPrint/event/",
            "octoPrint/event/+",
            &events,
        );

        assert_eq!(events_rx.try_recv().ok(), Some(PrinterEvent::PrintStarted));
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_action_is_a_json_bad_request() {
        let h = harness();

        let request = get_request("/api/plugin/octolight?action=explode");
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "action not recognized" }));
        assert!(!h.marker.exists());
    }

    #[tokio::test]
    async fn bare_plugin_request_toggles() {
        let h = harness();

        let (status, body) = send(&h.app, get_request("/api/plugin/octolight")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "state": true }));
        assert!(h.marker.exists());

        let (_, body) = send(&h.app, get_request("/api/plugin/octolight")).await;
        assert_eq!(body, json!({ "state": false }));
        assert!(!h.marker.exists());
    }

    #[tokio::test]
    async fn garbage_delay_uses_configured_minutes() {
        let h = harness();
        let mut settings = h.controller.settings().await;
        settings.delay_off = 30;
        h.controller.update_settings(settings).await;
        let before = chrono::Utc::now().timestamp();

        let (status, body) = send(
            &h.app,
            get_request("/api/plugin/octolight?action=delayOff&delay=soon"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], json!(true));
        let deadline = body["delayOffAt"].as_i64().unwrap();
        assert!(deadline >= before + 30 * 60);
        assert!(deadline <= chrono::Utc::now().timestamp() + 30 * 60);

        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn settings_update_rejects_zero_delay() {
        let h = harness();

        let (status, body) = send(
            &h.app,
            put_settings_request(json!({ "delay_off": 0 }).to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("delay_off"));
        assert!(!h.store.runtime_path.exists());
        assert_eq!(h.controller.settings().await.delay_off, 5);
    }

    #[tokio::test]
    async fn malformed_settings_body_is_a_json_error() {
        let h = harness();

        let (status, body) = send(
            &h.app,
            put_settings_request(json!({ "event_printer_done": "bogus" }).to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("bogus"));
        assert!(!h.store.runtime_path.exists());
    }

    #[tokio::test]
    async fn settings_update_is_persisted_and_applied() {
        let h = harness();
        let mut settings = h.controller.settings().await;
        settings.delay_off = 12;
        settings.event_printer_start = EventAction::TurnOn;

        let (status, body) = send(
            &h.app,
            put_settings_request(serde_json::to_string(&settings).unwrap()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delay_off"], json!(12));
        assert_eq!(h.controller.settings().await, settings);
        let stored = h.store.load_runtime_config().await.unwrap();
        assert_eq!(stored.settings, settings);
    }

    #[tokio::test]
    async fn settings_update_leaves_corrupt_store_alone() {
        let h = harness();
        let path = h.store.runtime_path.as_ref().clone();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();
        let mut settings = h.controller.settings().await;
        settings.delay_off = 12;

        let (status, body) = send(
            &h.app,
            put_settings_request(serde_json::to_string(&settings).unwrap()),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert_eq!(std::fs::read(&path).unwrap(), b"{not json");
        assert_eq!(h.controller.settings().await.delay_off, 5);
    }

    #[tokio::test]
    async fn missing_store_loads_defaults() {
        let (_dir, store) = scratch_store();

        let runtime = store.load_runtime_config().await.unwrap();

        assert_eq!(runtime.settings, LightSettings::default());
        assert_eq!(runtime.http_port, 5000);
    }

    #[tokio::test]
    async fn saved_settings_survive_reload() {
        let (_dir, store) = scratch_store();
        let mut runtime = RuntimeConfig::default();
        runtime.settings.on_command = "relay on".to_string();
        runtime.settings.event_printer_error = EventAction::TurnOff;

        store.save_runtime_config(&runtime).await.unwrap();
        let loaded = store.load_runtime_config().await.unwrap();

        assert_eq!(loaded.settings, runtime.settings);
    }

    #[tokio::test]
    async fn corrupt_store_is_an_error() {
        let (_dir, store) = scratch_store();
        let path = store.runtime_path.as_ref().clone();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(store.load_runtime_config().await.is_err());
    }
}
