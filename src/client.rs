use std::time::Duration;

use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, HeaderMap, HeaderValue, ORIGIN, REFERER,
};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Bounded wait applied to each polling handshake call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of the fixed framing the server wraps around the session
/// envelope, on each side.
const ENVELOPE_FRAMING: usize = 4;

/// Credentials and server selection for one client instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub auth_key: String,
    pub session: String,
    pub user_id: String,
    /// Server shard, e.g. `los1`.
    pub server: String,
}

/// HTTP side of the handshake: requests a session id over the polling
/// transport, authorizes it, and builds the push channel URL.
pub struct SessionClient {
    client: Client,
    config: SessionConfig,
    endpoint: Url,
}

impl SessionClient {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let endpoint = Url::parse(&format!(
            "https://{}.minesweeper.online/mine-websocket/",
            config.server
        ))?;

        // The server expects browser-looking requests.
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            ORIGIN,
            HeaderValue::from_static("https://minesweeper.online"),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_static("https://minesweeper.online/"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn auth_params(&self) -> [(&'static str, &str); 3] {
        [
            ("authKey", self.config.auth_key.as_str()),
            ("session", self.config.session.as_str()),
            ("userId", self.config.user_id.as_str()),
        ]
    }

    async fn poll(&self, sid: Option<&str>) -> Result<String> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .query(&self.auth_params())
            .query(&[("transport", "polling")]);
        if let Some(sid) = sid {
            request = request.query(&[("sid", sid)]);
        }

        let response = request.send().await.map_err(map_timeout)?;
        Ok(response.text().await.map_err(map_timeout)?)
    }

    /// Handshake step 1: obtain a fresh session id.
    pub async fn request_session(&self) -> Result<String> {
        debug!("requesting session id");
        let body = self.poll(None).await?;
        parse_session_id(&body)
    }

    /// Handshake step 2: authorize the session id. The server signals
    /// success only by the literal `authorized` in the body.
    pub async fn authorize_session(&self, sid: &str) -> Result<()> {
        debug!("authorizing session id");
        let body = self.poll(Some(sid)).await?;
        if body.contains("authorized") {
            Ok(())
        } else {
            Err(Error::AuthorizationFailed)
        }
    }

    /// Handshake step 3 input: push channel URL with credentials and the
    /// authorized session id embedded as query parameters.
    pub fn websocket_url(&self, sid: &str) -> Result<String> {
        let mut ws_url = self.endpoint.clone();
        ws_url
            .set_scheme(match self.endpoint.scheme() {
                "https" => "wss",
                _ => "ws",
            })
            .map_err(|_| Error::HandshakeFailed("failed to set websocket scheme".into()))?;
        ws_url
            .query_pairs_mut()
            .extend_pairs(self.auth_params())
            .append_pair("transport", "websocket")
            .append_pair("sid", sid);

        Ok(ws_url.to_string())
    }
}

fn map_timeout(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        err.into()
    }
}

/// Extract `sid` from the polling response: strip the fixed 4-byte framing
/// on both ends, decode the rest as JSON.
fn parse_session_id(body: &str) -> Result<String> {
    let inner = body
        .len()
        .checked_sub(ENVELOPE_FRAMING)
        .filter(|&end| end >= ENVELOPE_FRAMING)
        .and_then(|end| body.get(ENVELOPE_FRAMING..end))
        .ok_or_else(|| Error::HandshakeFailed("session response too short".into()))?;

    let envelope: Value = serde_json::from_str(inner)
        .map_err(|e| Error::HandshakeFailed(format!("bad session envelope: {e}")))?;
    envelope
        .get("sid")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::HandshakeFailed("session response missing sid".into()))
}
