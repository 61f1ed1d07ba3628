//! Helpers for testing the formula engine against a scripted remote.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Keep the [`LedgerServer`] alive until every request has been made. If the server is
//!    dropped, the port remains open and all connections to it will time out. Assign it to
//!    a variable in the test function (e.g. `let remote = ledger_server();`).

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the engine crate and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("ledgercell_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// One request as the scripted remote observed it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// The request path, e.g. `/batch/balance` or `/account/4010/name`.
    pub path: String,
    pub accounts: Vec<String>,
    pub periods: Vec<String>,
    pub subsidiary: String,
    pub class: String,
    pub department: String,
    pub location: String,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    accounts: Vec<String>,
    periods: Vec<String>,
    #[serde(default)]
    subsidiary: String,
    #[serde(default)]
    class: String,
    #[serde(default)]
    department: String,
    #[serde(default)]
    location: String,
}

#[derive(Debug, Default)]
struct RemoteState {
    /// Scripted status overrides, popped one per incoming request.
    statuses: Mutex<VecDeque<u16>>,
    balances: Mutex<HashMap<String, f64>>,
    budgets: Mutex<HashMap<String, f64>>,
    titles: Mutex<HashMap<String, String>>,
    /// Artificial latency applied to every request.
    delay: Mutex<Duration>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RemoteState {
    async fn admit(&self, request: RecordedRequest) -> Option<StatusCode> {
        self.requests.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let status = self.statuses.lock().unwrap().pop_front()?;
        Some(StatusCode::from_u16(status).unwrap())
    }
}

async fn serve_batch(
    state: Arc<RemoteState>,
    path: &str,
    key: &str,
    body: BatchBody,
) -> Response {
    let recorded = RecordedRequest {
        path: path.to_string(),
        accounts: body.accounts.clone(),
        periods: body.periods.clone(),
        subsidiary: body.subsidiary,
        class: body.class,
        department: body.department,
        location: body.location,
    };
    if let Some(status) = state.admit(recorded).await {
        return status.into_response();
    }

    let figures = if key == "budgets" {
        state.budgets.lock().unwrap().clone()
    } else {
        state.balances.lock().unwrap().clone()
    };

    // The real service aggregates the requested range and keys the figure by
    // the first requested period; unknown accounts come back as zero.
    let first_period = body.periods.first().cloned().unwrap_or_default();
    let mut values = serde_json::Map::new();
    for account in &body.accounts {
        let figure = figures.get(account).copied().unwrap_or(0.0);
        values.insert(account.clone(), json!({ &first_period: figure }));
    }
    Json(json!({ key: values })).into_response()
}

async fn balance_handler(
    State(state): State<Arc<RemoteState>>,
    Json(body): Json<BatchBody>,
) -> Response {
    serve_batch(state, "/batch/balance", "balances", body).await
}

async fn budget_handler(
    State(state): State<Arc<RemoteState>>,
    Json(body): Json<BatchBody>,
) -> Response {
    serve_batch(state, "/batch/budget", "budgets", body).await
}

async fn title_handler(
    State(state): State<Arc<RemoteState>>,
    Path(account): Path<String>,
) -> Response {
    let recorded = RecordedRequest {
        path: format!("/account/{account}/name"),
        accounts: vec![account.clone()],
        periods: Vec::new(),
        subsidiary: String::new(),
        class: String::new(),
        department: String::new(),
        location: String::new(),
    };
    if let Some(status) = state.admit(recorded).await {
        return status.into_response();
    }

    let name = state
        .titles
        .lock()
        .unwrap()
        .get(&account)
        .cloned()
        .unwrap_or_else(|| "Not Found".to_string());
    name.into_response()
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Creates a new test server from the given router.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A scripted stand-in for the remote general-ledger service.
///
/// Every request is recorded. Responses are computed from the configured
/// figure maps unless a status override was pushed, in which case the next
/// request (in arrival order) is answered with that status and no body.
pub struct LedgerServer {
    server: Server,
    state: Arc<RemoteState>,
}

/// Spawns a scripted remote on a random local port.
pub fn ledger_server() -> LedgerServer {
    let state = Arc::new(RemoteState::default());
    let router = Router::new()
        .route("/batch/balance", post(balance_handler))
        .route("/batch/budget", post(budget_handler))
        .route("/account/:account/name", get(title_handler))
        .with_state(Arc::clone(&state));

    LedgerServer {
        server: Server::with_router(router),
        state,
    }
}

impl LedgerServer {
    /// The base URL the engine should be pointed at.
    pub fn url(&self) -> Url {
        self.server.url("/")
    }

    /// Scripts the status of the next unscripted request (FIFO).
    pub fn push_status(&self, status: u16) {
        self.state.statuses.lock().unwrap().push_back(status);
    }

    /// Sets the figure returned for an account on the balance endpoint.
    pub fn set_balance(&self, account: &str, figure: f64) {
        self.state
            .balances
            .lock()
            .unwrap()
            .insert(account.to_string(), figure);
    }

    /// Sets the figure returned for an account on the budget endpoint.
    pub fn set_budget(&self, account: &str, figure: f64) {
        self.state
            .budgets
            .lock()
            .unwrap()
            .insert(account.to_string(), figure);
    }

    /// Sets the display name returned for an account.
    pub fn set_title(&self, account: &str, name: &str) {
        self.state
            .titles
            .lock()
            .unwrap()
            .insert(account.to_string(), name.to_string());
    }

    /// Delays every response, to widen the in-flight window in tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// All requests observed so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}
