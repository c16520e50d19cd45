//! LogiLink / Intellinet PDU protocol
//!
//! Status: `GET /status.xml` (basic auth) answers a `<response>` document with
//! `outletStat0`..`outletStat7` (`on`/`off`) plus the `tempBan`, `humBan` and
//! `curBan` sensor fields. Firmwares that support it also send
//! `outletName0`..`outletName7` and the `model`, `version`, `mac` and `uptime`
//! identity fields.
//!
//! Control: `GET /control_outlet.htm?outlet{N-1}=1&op={0|1}`. The op code is
//! inverted on these units: `op=0` switches ON, `op=1` switches OFF.
//!
//! Reboot: `POST /system.htm` with the form `reboot=1&confirm=yes`.

use super::{check_outlet, PduDriver};
use crate::config::DeviceConfig;
use crate::error::PduError;
use crate::models::{DeviceInfo, DeviceStatus, Health, OutletState, OUTLET_COUNT};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const STATUS_PATH: &str = "/status.xml";
const CONTROL_PATH: &str = "/control_outlet.htm";
const SYSTEM_PATH: &str = "/system.htm";
const REBOOT_FORM: [(&str, &str); 2] = [("reboot", "1"), ("confirm", "yes")];
const MARKER_ELEMENT: &str = "response";

pub struct LogiLinkDriver {
    name: String,
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
    client: Client,
}

impl LogiLinkDriver {
    pub fn new(config: &DeviceConfig) -> Result<Self, PduError> {
        Self::with_timeout(config, config.request_timeout())
    }

    /// Same as [`Self::new`] with an explicit request timeout.
    pub fn with_timeout(config: &DeviceConfig, timeout: Duration) -> Result<Self, PduError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdu-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PduError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            base_url: base_url(&config.host),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_request_error(&self, err: reqwest::Error) -> PduError {
        if err.is_timeout() {
            PduError::Timeout(self.timeout)
        } else {
            PduError::Connection(err.to_string())
        }
    }

    async fn get(&self, path: &str, query: &[(String, &str)]) -> Result<reqwest::Response, PduError> {
        self.send(self.client.get(self.url(path)).query(query)).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, PduError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(PduError::AuthFailure),
            s if s.is_success() => Ok(response),
            s => Err(PduError::ProtocolParse(format!("unexpected HTTP status {s}"))),
        }
    }
}

#[async_trait]
impl PduDriver for LogiLinkDriver {
    async fn fetch_status(&self) -> Result<DeviceStatus, PduError> {
        debug!("fetching status for {}", self.name);
        let body = self
            .get(STATUS_PATH, &[])
            .await?
            .text()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = parse_status_document(&body)?;
        if status.health == Health::Degraded {
            warn!("{}: status document is missing outlet fields", self.name);
        }
        Ok(status)
    }

    async fn set_outlet(&self, outlet: u8, on: bool) -> Result<(), PduError> {
        let query = control_params(outlet, on)?;
        debug!("{}: outlet {} -> {}", self.name, outlet, if on { "ON" } else { "OFF" });
        self.get(CONTROL_PATH, &query).await?;
        Ok(())
    }

    async fn reboot(&self) -> Result<(), PduError> {
        info!("{}: requesting reboot", self.name);
        self.send(self.client.post(self.url(SYSTEM_PATH)).form(&REBOOT_FORM)).await?;
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        match self.get(STATUS_PATH, &[]).await {
            Ok(_) => true,
            Err(e) => {
                warn!("connection test failed for {}: {}", self.name, e);
                false
            }
        }
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Query parameters for a control request: `outlet{N-1}=1` and the inverted op code.
pub fn control_params(outlet: u8, on: bool) -> Result<[(String, &'static str); 2], PduError> {
    check_outlet(outlet)?;
    let op = if on { "0" } else { "1" };
    Ok([(format!("outlet{}", outlet - 1), "1"), ("op".to_string(), op)])
}

/// Parses a `/status.xml` body.
///
/// The root element must be `<response>`. A missing or unparseable outlet field
/// yields [`OutletState::Unknown`] and a [`Health::Degraded`] status; a sensor
/// field that is not a finite number is reported as absent.
pub fn parse_status_document(xml: &str) -> Result<DeviceStatus, PduError> {
    let fields = collect_fields(xml)?;

    let mut outlets = [OutletState::Unknown; OUTLET_COUNT];
    for (idx, slot) in outlets.iter_mut().enumerate() {
        if let Some(raw) = fields.get(&format!("outletStat{idx}")) {
            *slot = OutletState::from_device(raw);
        }
    }

    let partial = outlets.iter().any(|o| *o == OutletState::Unknown);

    Ok(DeviceStatus {
        outlets,
        outlet_names: std::array::from_fn(|idx| text_field(&fields, &format!("outletName{idx}"))),
        info: DeviceInfo {
            model: text_field(&fields, "model"),
            firmware: text_field(&fields, "version"),
            mac: text_field(&fields, "mac"),
            uptime: text_field(&fields, "uptime"),
        },
        temperature: numeric_field(&fields, "tempBan"),
        humidity: numeric_field(&fields, "humBan"),
        current: numeric_field(&fields, "curBan"),
        health: if partial { Health::Degraded } else { Health::Online },
        last_success: Some(OffsetDateTime::now_utc()),
        consecutive_errors: 0,
    })
}

fn text_field(fields: &HashMap<String, String>, name: &str) -> Option<String> {
    fields
        .get(name)
        .map(|raw| raw.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn numeric_field(fields: &HashMap<String, String>, name: &str) -> Option<f64> {
    fields
        .get(name)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Text of every direct child of the `<response>` root, by element name.
fn collect_fields(xml: &str) -> Result<HashMap<String, String>, PduError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut depth = 0usize;
    let mut saw_marker = false;
    let mut current: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            PduError::ProtocolParse(format!("malformed XML at byte {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                depth += 1;
                if depth == 1 {
                    if name != MARKER_ELEMENT {
                        return Err(PduError::ProtocolParse(format!(
                            "expected <{MARKER_ELEMENT}> root, found <{name}>"
                        )));
                    }
                    saw_marker = true;
                } else if depth == 2 {
                    fields.entry(name.clone()).or_insert_with(String::new);
                    current = Some(name);
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 if name == MARKER_ELEMENT => saw_marker = true,
                    0 => {
                        return Err(PduError::ProtocolParse(format!(
                            "expected <{MARKER_ELEMENT}> root, found <{name}/>"
                        )))
                    }
                    1 => {
                        fields.insert(name, String::new());
                    }
                    _ => {}
                }
            }
            Event::Text(t) if depth == 2 => {
                if let Some(name) = &current {
                    let text = t
                        .unescape()
                        .map_err(|e| PduError::ProtocolParse(format!("bad text in <{name}>: {e}")))?;
                    fields.insert(name.clone(), text.into_owned());
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    current = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_marker {
        return Err(PduError::ProtocolParse(format!("missing <{MARKER_ELEMENT}> marker")));
    }
    if depth != 0 {
        return Err(PduError::ProtocolParse("truncated status document".into()));
    }
    Ok(fields)
}
