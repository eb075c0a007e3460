//! HTTP surface of the dashboard: JSON read endpoints and control actions,
//! all behind HTTP Basic authentication.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ingest_monitor_core::{
    BlockDevice, ControlAction, ControlError, ControlOutcome, IngestSession, LookupError,
    SessionLog, StatusSnapshot, SystemInfo,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::dashboard::Dashboard;

const REALM: &str = "Basic realm=\"Ingest Dashboard\"";

#[derive(Clone)]
pub struct AppState {
    dashboard: Arc<Dashboard>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Timeout(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unauthorized => {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, REALM)],
                    Json(json!({ "error": "Unauthorized" })),
                )
                    .into_response();
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Timeout(message) => (StatusCode::GATEWAY_TIMEOUT, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::InvalidInput(message) => Self::BadRequest(message),
            ControlError::Timeout(_) => Self::Timeout(err.to_string()),
            ControlError::Spawn { .. } | ControlError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound("folder") => Self::NotFound("Folder not found".to_string()),
            LookupError::NotFound("log") => Self::NotFound("Log file not found".to_string()),
            LookupError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            LookupError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

pub fn router(dashboard: Arc<Dashboard>) -> Router {
    let state = AppState { dashboard };
    Router::new()
        .route("/api/status", get(status))
        .route("/api/history", get(history))
        .route("/api/system", get(system))
        .route("/api/devices", get(devices))
        .route("/api/logs/{session}", get(session_log))
        .route("/api/control/auto-scan", post(control_auto_scan))
        .route("/api/control/manual-scan", post(control_manual_scan))
        .route("/api/control/stop", post(control_stop))
        .route("/api/control/delete-folder", post(control_delete_folder))
        .route("/api/control/unmount-device", post(control_unmount_device))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ))
        .with_state(state)
}

/// Filesystem walks, Argon2 and child processes all block.
async fn blocking<T, F>(dashboard: &Arc<Dashboard>, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Dashboard) -> T + Send + 'static,
{
    let dashboard = Arc::clone(dashboard);
    tokio::task::spawn_blocking(move || work(&dashboard))
        .await
        .map_err(|err| {
            error!("blocking task failed: {err}");
            ApiError::Internal(err.to_string())
        })
}

async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (username, password) =
        basic_credentials(request.headers()).ok_or(ApiError::Unauthorized)?;
    let verified = blocking(&state.dashboard, move |dashboard| {
        dashboard.credentials().verify(&username, &password)
    })
    .await?;
    if !verified {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusSnapshot>, ApiError> {
    let observed = blocking(&state.dashboard, |dashboard| dashboard.status()).await?;
    Ok(Json(observed.value))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<IngestSession>>, ApiError> {
    let observed =
        blocking(&state.dashboard, move |dashboard| dashboard.history(query.limit)).await?;
    Ok(Json(observed.value))
}

async fn system(State(state): State<AppState>) -> Result<Json<SystemInfo>, ApiError> {
    let observed = blocking(&state.dashboard, |dashboard| dashboard.system()).await?;
    Ok(Json(observed.value))
}

async fn devices(State(state): State<AppState>) -> Result<Json<Vec<BlockDevice>>, ApiError> {
    let observed = blocking(&state.dashboard, |dashboard| dashboard.devices()).await?;
    Ok(Json(observed.value))
}

async fn session_log(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Json<SessionLog>, ApiError> {
    let log = blocking(&state.dashboard, move |dashboard| {
        dashboard.session_log(&session)
    })
    .await??;
    Ok(Json(log))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ControlBody {
    action: Option<String>,
    device: Option<String>,
    folder: Option<String>,
}

fn body_of(body: Option<Json<ControlBody>>) -> ControlBody {
    body.map(|Json(body)| body).unwrap_or_default()
}

async fn run_action(
    state: &AppState,
    action: Result<ControlAction, ControlError>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let action = action?;
    let outcome = blocking(&state.dashboard, move |dashboard| {
        dashboard.control(&action)
    })
    .await??;
    Ok(Json(outcome))
}

async fn control_auto_scan(
    State(state): State<AppState>,
    body: Option<Json<ControlBody>>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let action = match body_of(body).action.as_deref() {
        Some("enable") => Ok(ControlAction::EnableAutoScan),
        Some("disable") => Ok(ControlAction::DisableAutoScan),
        _ => Err(ControlError::InvalidInput("Invalid action".to_string())),
    };
    run_action(&state, action).await
}

async fn control_manual_scan(
    State(state): State<AppState>,
    body: Option<Json<ControlBody>>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let body = body_of(body);
    run_action(&state, ControlAction::manual_scan(body.device.as_deref())).await
}

async fn control_stop(State(state): State<AppState>) -> Result<Json<ControlOutcome>, ApiError> {
    run_action(&state, Ok(ControlAction::Stop)).await
}

async fn control_delete_folder(
    State(state): State<AppState>,
    body: Option<Json<ControlBody>>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let body = body_of(body);
    run_action(&state, ControlAction::delete_folder(body.folder.as_deref())).await
}

async fn control_unmount_device(
    State(state): State<AppState>,
    body: Option<Json<ControlBody>>,
) -> Result<Json<ControlOutcome>, ApiError> {
    let body = body_of(body);
    run_action(&state, ControlAction::unmount_device(body.device.as_deref())).await
}

/// Serves until ctrl-c or SIGTERM. SIGHUP reloads the credentials file.
pub async fn serve(dashboard: Arc<Dashboard>, addr: SocketAddr) -> Result<()> {
    #[cfg(unix)]
    spawn_credential_reloader(Arc::clone(&dashboard))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, router(dashboard))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    info!("dashboard shut down");
    Ok(())
}

#[cfg(unix)]
fn spawn_credential_reloader(dashboard: Arc<Dashboard>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup =
        signal(SignalKind::hangup()).context("failed to hook the hangup signal")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            let dashboard = Arc::clone(&dashboard);
            let reloaded =
                tokio::task::spawn_blocking(move || dashboard.credentials().reload()).await;
            match reloaded {
                Ok(Ok(users)) => info!(users, "credentials reloaded on SIGHUP"),
                Ok(Err(err)) => error!("credential reload failed: {err}"),
                Err(err) => error!("credential reload task failed: {err}"),
            }
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                error!("failed to hook the terminate signal: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutting down due to ctrl-c"),
        _ = terminate => info!("shutting down due to terminate"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Arc, Mutex};

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use ingest_monitor_core::{
        hash_password, ControlAction, ControlBridge, ControlError, ControlOutcome,
        CredentialStore, MonitorConfig,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::router;
    use crate::dashboard::Dashboard;

    #[derive(Default)]
    struct RecordingBridge {
        calls: Mutex<Vec<ControlAction>>,
    }

    impl ControlBridge for RecordingBridge {
        fn execute(&self, action: &ControlAction) -> Result<ControlOutcome, ControlError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(action.clone());
            }
            Ok(ControlOutcome {
                success: true,
                message: format!("ran {}", action.program_args().join(" ")),
                auto_scan_enabled: action.toggles_auto_scan().then_some(true),
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        bridge: Arc<RecordingBridge>,
        app: axum::Router,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let ingest_root = dir.path().join("ingest");
        fs::create_dir_all(ingest_root.join("2024-05-01")).expect("mkdir");
        fs::write(
            ingest_root.join("2024-05-01/ingest_log.txt"),
            "Drive Label: CARD_A\nSUCCESS\n",
        )
        .expect("write log");
        fs::create_dir_all(ingest_root.join("2024-05-02")).expect("mkdir");

        let config = MonitorConfig {
            ingest_root,
            status_file: dir.path().join("current.json"),
            auto_scan_flag: dir.path().join("auto_scan_enabled"),
            ..MonitorConfig::default()
        };
        let credentials = CredentialStore::from_entries([(
            "operator",
            hash_password("letmein").expect("hash"),
        )]);
        let bridge = Arc::new(RecordingBridge::default());
        let dashboard = Dashboard::new(config, Arc::new(credentials), bridge.clone());
        Fixture {
            _dir: dir,
            bridge,
            app: router(Arc::new(dashboard)),
        }
    }

    fn authorized(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri).header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode("operator:letmein")),
        );
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_credentials() {
        let fixture = fixture();
        let response = fixture
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let response = fixture
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .header(
                        header::AUTHORIZATION,
                        format!("Basic {}", STANDARD.encode("operator:nope")),
                    )
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_defaults_to_idle() {
        let fixture = fixture();
        let response = fixture
            .app
            .oneshot(authorized("GET", "/api/status", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "idle");
        assert_eq!(body["message"], "Ready for drive");
    }

    #[tokio::test]
    async fn history_honours_limit() {
        let fixture = fixture();
        let response = fixture
            .app
            .oneshot(authorized("GET", "/api/history?limit=1", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn log_lookup_maps_missing_to_not_found() {
        let fixture = fixture();
        let found = fixture
            .app
            .clone()
            .oneshot(authorized("GET", "/api/logs/2024-05-01", None))
            .await
            .expect("response");
        assert_eq!(found.status(), StatusCode::OK);
        assert!(json_body(found).await["log"]
            .as_str()
            .is_some_and(|log| log.contains("SUCCESS")));

        let no_log = fixture
            .app
            .clone()
            .oneshot(authorized("GET", "/api/logs/2024-05-02", None))
            .await
            .expect("response");
        assert_eq!(no_log.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(no_log).await["error"], "Log file not found");

        let no_folder = fixture
            .app
            .oneshot(authorized("GET", "/api/logs/1999-01-01", None))
            .await
            .expect("response");
        assert_eq!(no_folder.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(no_folder).await["error"], "Folder not found");
    }

    #[tokio::test]
    async fn invalid_control_input_never_reaches_the_bridge() {
        let fixture = fixture();
        let response = fixture
            .app
            .clone()
            .oneshot(authorized("POST", "/api/control/manual-scan", Some("{}")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = fixture
            .app
            .clone()
            .oneshot(authorized(
                "POST",
                "/api/control/auto-scan",
                Some(r#"{"action": "toggle"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = fixture
            .app
            .oneshot(authorized("POST", "/api/control/delete-folder", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(fixture.bridge.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn control_actions_are_forwarded() {
        let fixture = fixture();
        let response = fixture
            .app
            .clone()
            .oneshot(authorized(
                "POST",
                "/api/control/auto-scan",
                Some(r#"{"action": "enable"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["enabled"], true);

        let response = fixture
            .app
            .oneshot(authorized(
                "POST",
                "/api/control/unmount-device",
                Some(r#"{"device": "/dev/sdb1"}"#),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "ran unmount-device /dev/sdb1");

        let calls = fixture.bridge.calls.lock().expect("lock").clone();
        assert_eq!(
            calls,
            vec![
                ControlAction::EnableAutoScan,
                ControlAction::UnmountDevice {
                    device: "/dev/sdb1".to_string()
                },
            ]
        );
    }
}
