// crates/entitlement-gate-telegram/src/client.rs
// ============================================================================
// Module: Telegram Bot API Client
// Description: Blocking `getBusinessConnection` probe with bounded responses.
// Purpose: Answer permission probes for stored business connections.
// Dependencies: entitlement-gate-core, reqwest, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each probe is one `POST {api_base}/bot{token}/getBusinessConnection` with
//! a JSON body naming the connection. A response with `ok = true` is a valid
//! connection. Error responses are classified by [`classify_api_error`];
//! transport failures, oversized or undecodable bodies, and unexpected
//! statuses are reported as [`GatewayError::Other`]. The bot token never
//! appears in errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::io::Read;
use std::time::Duration;

use entitlement_gate_core::ConnectionId;
use entitlement_gate_core::GatewayError;
use entitlement_gate_core::PermissionGateway;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bot API method used for probes.
const PROBE_METHOD: &str = "getBusinessConnection";

/// Marker for unknown or revoked connections.
const CONNECTION_INVALID_MARKER: &str = "BUSINESS_CONNECTION_INVALID";

/// Markers for connections that lack rights.
const FORBIDDEN_MARKERS: [&str; 2] = ["Forbidden", "no rights"];

/// HTTP status used by the Bot API for rights failures.
const FORBIDDEN_STATUS: u16 = 403;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the Telegram permission gateway.
///
/// # Invariants
/// - `allow_http = false` blocks cleartext `http://` API bases.
/// - `timeout_ms` applies to the full request lifecycle.
/// - `max_response_bytes` bounds response bodies.
#[derive(Clone, PartialEq, Eq)]
pub struct TelegramGatewayConfig {
    /// API base URL without a trailing `/bot...` segment.
    pub api_base: String,
    /// Bot token.
    pub token: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// User agent string for outbound requests.
    pub user_agent: String,
    /// Allow cleartext HTTP (disabled by default).
    pub allow_http: bool,
    /// Maximum response size allowed, in bytes.
    pub max_response_bytes: usize,
}

impl Default for TelegramGatewayConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: String::new(),
            timeout_ms: 10_000,
            user_agent: "entitlement-gate/0.1".to_string(),
            allow_http: false,
            max_response_bytes: 1024 * 1024,
        }
    }
}

impl fmt::Debug for TelegramGatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramGatewayConfig")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .field("user_agent", &self.user_agent)
            .field("allow_http", &self.allow_http)
            .field("max_response_bytes", &self.max_response_bytes)
            .finish()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Telegram gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelegramGatewayError {
    /// Invalid gateway configuration.
    #[error("telegram gateway invalid config: {0}")]
    Config(String),
    /// Request could not be sent or the response could not be read.
    #[error("telegram transport error: {0}")]
    Transport(String),
    /// Response body could not be decoded.
    #[error("telegram response decode error: {0}")]
    Decode(String),
    /// Bot API returned an error payload.
    #[error("telegram api error {status}: {description}")]
    Api {
        /// HTTP status or `error_code`.
        status: u16,
        /// Bot API error description.
        description: String,
    },
}

impl From<TelegramGatewayError> for GatewayError {
    fn from(error: TelegramGatewayError) -> Self {
        match error {
            TelegramGatewayError::Api {
                status,
                description,
            } => classify_api_error(status, &description),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Maps a Bot API error onto the core gateway classes.
///
/// `BUSINESS_CONNECTION_INVALID` on a 400 or 404 is an invalid connection.
/// A 403, or a 400 whose description mentions `Forbidden` or `no rights`, is a
/// rights failure. Everything else is [`GatewayError::Other`].
#[must_use]
pub fn classify_api_error(status: u16, description: &str) -> GatewayError {
    let detail = format!("{status}: {description}");
    if matches!(status, 400 | 404) && description.contains(CONNECTION_INVALID_MARKER) {
        return GatewayError::ConnectionInvalid(detail);
    }
    if status == FORBIDDEN_STATUS
        || (status == 400 && FORBIDDEN_MARKERS.iter().any(|marker| description.contains(marker)))
    {
        return GatewayError::Forbidden(detail);
    }
    GatewayError::Other(detail)
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    /// Whether the call succeeded.
    ok: bool,
    /// Error code on failure.
    #[serde(default)]
    error_code: Option<u16>,
    /// Error description on failure.
    #[serde(default)]
    description: Option<String>,
}

/// Permission gateway backed by the Telegram Bot API.
pub struct TelegramPermissionGateway {
    /// Gateway configuration.
    config: TelegramGatewayConfig,
    /// Probe endpoint, including the token.
    endpoint: Url,
    /// HTTP client used for outbound requests.
    client: Client,
}

impl fmt::Debug for TelegramPermissionGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramPermissionGateway").field("config", &self.config).finish()
    }
}

impl TelegramPermissionGateway {
    /// Creates a gateway with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramGatewayError::Config`] when the token is empty, the
    /// API base is not an allowed URL, or the HTTP client cannot be built.
    pub fn new(config: TelegramGatewayConfig) -> Result<Self, TelegramGatewayError> {
        if config.token.trim().is_empty() {
            return Err(TelegramGatewayError::Config("bot token is empty".to_string()));
        }
        let endpoint = build_endpoint(&config)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|_| TelegramGatewayError::Config("http client build failed".to_string()))?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    /// Returns the gateway configuration.
    #[must_use]
    pub const fn config(&self) -> &TelegramGatewayConfig {
        &self.config
    }

    /// Calls `getBusinessConnection` once.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramGatewayError`] for transport failures, undecodable
    /// bodies, and Bot API error payloads.
    pub fn get_business_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<(), TelegramGatewayError> {
        let body = json!({ "business_connection_id": connection_id.as_str() }).to_string();
        let mut response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|err| TelegramGatewayError::Transport(err.without_url().to_string()))?;
        let status = response.status().as_u16();
        let bytes = read_response_limited(&mut response, self.config.max_response_bytes)?;
        let envelope: ApiEnvelope = serde_json::from_slice(&bytes).map_err(|err| {
            TelegramGatewayError::Decode(format!("status {status}: {err}"))
        })?;
        if envelope.ok && (200 .. 300).contains(&status) {
            return Ok(());
        }
        Err(TelegramGatewayError::Api {
            status: envelope.error_code.unwrap_or(status),
            description: envelope.description.unwrap_or_default(),
        })
    }
}

impl PermissionGateway for TelegramPermissionGateway {
    fn probe_connection(&self, connection_id: &ConnectionId) -> Result<(), GatewayError> {
        self.get_business_connection(connection_id).map_err(GatewayError::from)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates the API base and appends the method path.
fn build_endpoint(config: &TelegramGatewayConfig) -> Result<Url, TelegramGatewayError> {
    let base = Url::parse(config.api_base.trim_end_matches('/'))
        .map_err(|_| TelegramGatewayError::Config("invalid api_base url".to_string()))?;
    match base.scheme() {
        "https" => {}
        "http" if config.allow_http => {}
        _ => return Err(TelegramGatewayError::Config("unsupported api_base scheme".to_string())),
    }
    if !base.username().is_empty() || base.password().is_some() {
        return Err(TelegramGatewayError::Config(
            "api_base credentials are not allowed".to_string(),
        ));
    }
    if base.query().is_some() || base.fragment().is_some() {
        return Err(TelegramGatewayError::Config(
            "api_base must not carry a query or fragment".to_string(),
        ));
    }
    let path = format!("{}/bot{}/{PROBE_METHOD}", base.path().trim_end_matches('/'), config.token);
    let mut endpoint = base;
    endpoint.set_path(&path);
    Ok(endpoint)
}

/// Reads the response body while enforcing a byte limit.
fn read_response_limited(
    response: &mut Response,
    max_bytes: usize,
) -> Result<Vec<u8>, TelegramGatewayError> {
    let max_bytes_u64 = u64::try_from(max_bytes)
        .map_err(|_| TelegramGatewayError::Config("response size limit exceeds u64".to_string()))?;
    if let Some(expected) = response.content_length()
        && expected > max_bytes_u64
    {
        return Err(TelegramGatewayError::Transport("response exceeds size limit".to_string()));
    }
    let mut buf = Vec::new();
    response
        .take(max_bytes_u64.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|_| TelegramGatewayError::Transport("failed to read response".to_string()))?;
    if buf.len() > max_bytes {
        return Err(TelegramGatewayError::Transport("response exceeds size limit".to_string()));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests;
