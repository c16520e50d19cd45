/*!
Fake LogiLink PDU served over HTTP

Speaks the vendor protocol on an ephemeral localhost port:
- `GET /status.xml` returns the status document built from the current state
- `GET /control_outlet.htm?outlet{N}=1&op={0|1}` switches an outlet (op=0 is ON)
- `POST /system.htm` with `reboot=1&confirm=yes` counts a reboot

All routes require HTTP basic auth. Failure modes can be switched at runtime and
every request is counted so tests can assert that no network call happened.
*/

use axum::extract::{Form, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use anyhow::Result;
use base64::Engine;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::test_utils::StatusXml;

/// How the fake device answers
#[derive(Debug, Clone, PartialEq)]
pub enum FakeMode {
    Normal,
    /// Every request gets a 401
    Unauthorized,
    /// Status answers with this body instead of the generated document
    Body(String),
    /// Every request waits this long before answering
    Slow(Duration),
    /// Every request gets a 500
    ServerError,
}

#[derive(Debug)]
struct FakePduState {
    outlets: [String; 8],
    temperature: Option<String>,
    humidity: Option<String>,
    current: Option<String>,
    extra_fields: Vec<(String, String)>,
    mode: FakeMode,
    credentials: (String, String),
    status_requests: usize,
    control_requests: Vec<HashMap<String, String>>,
    reboot_requests: usize,
}

type SharedFake = Arc<Mutex<FakePduState>>;

pub struct FakePdu {
    addr: SocketAddr,
    state: SharedFake,
    handle: JoinHandle<()>,
}

impl FakePdu {
    /// Starts a device with every outlet off and all three sensors reporting
    pub async fn start() -> Result<Self> {
        Self::start_with_credentials("admin", "admin").await
    }

    pub async fn start_with_credentials(username: &str, password: &str) -> Result<Self> {
        let state = Arc::new(Mutex::new(FakePduState {
            outlets: std::array::from_fn(|_| "off".to_string()),
            temperature: Some("23.5".into()),
            humidity: Some("41".into()),
            current: Some("1.2".into()),
            extra_fields: Vec::new(),
            mode: FakeMode::Normal,
            credentials: (username.to_string(), password.to_string()),
            status_requests: 0,
            control_requests: Vec::new(),
            reboot_requests: 0,
        }));

        let app = Router::new()
            .route("/status.xml", get(status_handler))
            .route("/control_outlet.htm", get(control_handler))
            .route("/system.htm", post(system_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[fake-pdu] server stopped: {}", e);
            }
        });

        log::debug!("[fake-pdu] listening on {}", addr);
        Ok(Self { addr, state, handle })
    }

    /// `host:port` as it would appear in a device configuration
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn set_mode(&self, mode: FakeMode) {
        self.state.lock().unwrap().mode = mode;
    }

    /// Sets outlet `index` (0-based, as on the wire) to a raw field value
    pub fn set_outlet(&self, index: usize, value: &str) {
        self.state.lock().unwrap().outlets[index] = value.to_string();
    }

    pub fn outlet(&self, index: usize) -> String {
        self.state.lock().unwrap().outlets[index].clone()
    }

    pub fn set_sensors(&self, temperature: Option<&str>, humidity: Option<&str>, current: Option<&str>) {
        let mut st = self.state.lock().unwrap();
        st.temperature = temperature.map(String::from);
        st.humidity = humidity.map(String::from);
        st.current = current.map(String::from);
    }

    /// Adds a top-level field to the status document, e.g. `outletName0` or `model`
    pub fn set_field(&self, name: &str, value: &str) {
        let mut st = self.state.lock().unwrap();
        st.extra_fields.retain(|(n, _)| n != name);
        st.extra_fields.push((name.to_string(), value.to_string()));
    }

    pub fn reboot_requests(&self) -> usize {
        self.state.lock().unwrap().reboot_requests
    }

    pub fn status_requests(&self) -> usize {
        self.state.lock().unwrap().status_requests
    }

    /// Query strings of every control request received, in order
    pub fn control_requests(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().control_requests.clone()
    }

    pub fn total_requests(&self) -> usize {
        let st = self.state.lock().unwrap();
        st.status_requests + st.control_requests.len() + st.reboot_requests
    }
}

impl Drop for FakePdu {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn authorized(headers: &HeaderMap, credentials: &(String, String)) -> bool {
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", credentials.0, credentials.1))
    );
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

/// Applies the failure mode shared by both routes; `None` means answer normally
async fn failure_response(state: &SharedFake, headers: &HeaderMap) -> Option<Response> {
    let (mode, credentials) = {
        let st = state.lock().unwrap();
        (st.mode.clone(), st.credentials.clone())
    };

    if let FakeMode::Slow(delay) = mode {
        tokio::time::sleep(delay).await;
    }

    match mode {
        FakeMode::Unauthorized => Some(StatusCode::UNAUTHORIZED.into_response()),
        FakeMode::ServerError => Some(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        _ if !authorized(headers, &credentials) => Some(StatusCode::UNAUTHORIZED.into_response()),
        _ => None,
    }
}

async fn status_handler(State(state): State<SharedFake>, headers: HeaderMap) -> Response {
    state.lock().unwrap().status_requests += 1;

    if let Some(resp) = failure_response(&state, &headers).await {
        return resp;
    }

    let body = {
        let st = state.lock().unwrap();
        match &st.mode {
            FakeMode::Body(body) => body.clone(),
            _ => {
                let mut doc = StatusXml::new();
                for (i, value) in st.outlets.iter().enumerate() {
                    doc = doc.outlet(i, value);
                }
                if let Some(t) = &st.temperature {
                    doc = doc.temperature(t);
                }
                if let Some(h) = &st.humidity {
                    doc = doc.humidity(h);
                }
                if let Some(c) = &st.current {
                    doc = doc.current(c);
                }
                for (name, value) in &st.extra_fields {
                    doc = doc.field(name, value);
                }
                doc.build()
            }
        }
    };

    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

async fn control_handler(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.lock().unwrap().control_requests.push(params.clone());

    if let Some(resp) = failure_response(&state, &headers).await {
        return resp;
    }

    let op = params.get("op").map(String::as_str);
    let target = params
        .iter()
        .filter(|(k, v)| k.starts_with("outlet") && v.as_str() == "1")
        .filter_map(|(k, _)| k.trim_start_matches("outlet").parse::<usize>().ok())
        .find(|idx| *idx < 8);

    match (target, op) {
        (Some(idx), Some("0")) => state.lock().unwrap().outlets[idx] = "on".into(),
        (Some(idx), Some("1")) => state.lock().unwrap().outlets[idx] = "off".into(),
        _ => return StatusCode::BAD_REQUEST.into_response(),
    }

    (StatusCode::OK, "OK").into_response()
}

async fn system_handler(
    State(state): State<SharedFake>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    if let Some(resp) = failure_response(&state, &headers).await {
        return resp;
    }

    let confirmed = params.get("reboot").map(String::as_str) == Some("1")
        && params.get("confirm").map(String::as_str) == Some("yes");
    if !confirmed {
        return StatusCode::BAD_REQUEST.into_response();
    }

    state.lock().unwrap().reboot_requests += 1;
    (StatusCode::OK, "Rebooting").into_response()
}
