use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Prefix marking an application message frame.
pub const MESSAGE_PREFIX: &str = "42";

/// Trailing sentinel the server expects on every request envelope. Its
/// meaning is unknown; it is reproduced verbatim.
pub const ACTION_TOKEN: &str = "494";

const PROBE: &str = "2probe";
const PROBE_ACK: &str = "3probe";
const PING: &str = "2";
const PONG: &str = "3";
const UPGRADE: &str = "5";

/// Message envelope direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Request,
    Response,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Request => "request",
            Channel::Response => "response",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Channel::Request),
            "response" => Some(Channel::Response),
            _ => None,
        }
    }
}

/// One decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `"2probe"`, sent by the client right after the socket opens.
    Probe,
    /// `"3probe"`, the server's answer confirming the push channel is live.
    ProbeAck,
    /// `"2"`, the periodic liveness frame the client emits.
    Ping,
    /// `"3"`, the server's liveness reply. Ignored.
    Pong,
    /// `"5"`, confirms the upgrade after a successful probe exchange.
    Upgrade,
    /// `"42"` + `[channel, [action, payload, token]]`.
    Message {
        channel: Channel,
        action: String,
        payload: Value,
        token: String,
    },
}

impl Frame {
    /// Build an outbound request message carrying `action` and `payload`.
    pub fn request(action: &str, payload: Value) -> Self {
        Frame::Message {
            channel: Channel::Request,
            action: action.to_string(),
            payload,
            token: ACTION_TOKEN.to_string(),
        }
    }

    /// Decode raw frame text. Anything that is neither a known control
    /// token nor a well-formed message envelope is a `MalformedFrame`.
    pub fn decode(text: &str) -> Result<Self> {
        match text {
            PROBE => return Ok(Frame::Probe),
            PROBE_ACK => return Ok(Frame::ProbeAck),
            PING => return Ok(Frame::Ping),
            PONG => return Ok(Frame::Pong),
            UPGRADE => return Ok(Frame::Upgrade),
            _ => {}
        }

        let Some(body) = text.strip_prefix(MESSAGE_PREFIX) else {
            return Err(Error::MalformedFrame(format!(
                "unknown frame prefix: {:?}",
                text.chars().take(8).collect::<String>()
            )));
        };

        let envelope: Value = serde_json::from_str(body)
            .map_err(|e| Error::MalformedFrame(format!("invalid message json: {e}")))?;
        let outer = envelope
            .as_array()
            .ok_or_else(|| Error::MalformedFrame("envelope is not an array".into()))?;

        let channel = outer
            .first()
            .and_then(Value::as_str)
            .and_then(Channel::from_str)
            .ok_or_else(|| Error::MalformedFrame("missing or unknown channel".into()))?;
        let inner = outer
            .get(1)
            .and_then(Value::as_array)
            .ok_or_else(|| Error::MalformedFrame("missing action body".into()))?;
        let action = inner
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedFrame("missing action id".into()))?
            .to_string();
        let payload = inner.get(1).cloned().unwrap_or(Value::Null);
        let token = inner
            .get(2)
            .and_then(Value::as_str)
            .unwrap_or(ACTION_TOKEN)
            .to_string();

        Ok(Frame::Message {
            channel,
            action,
            payload,
            token,
        })
    }

    /// Encode this frame to wire text.
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Frame::Probe => PROBE.to_string(),
            Frame::ProbeAck => PROBE_ACK.to_string(),
            Frame::Ping => PING.to_string(),
            Frame::Pong => PONG.to_string(),
            Frame::Upgrade => UPGRADE.to_string(),
            Frame::Message {
                channel,
                action,
                payload,
                token,
            } => {
                let envelope = json!([channel.as_str(), [action, payload, token]]);
                format!("{}{}", MESSAGE_PREFIX, serde_json::to_string(&envelope)?)
            }
        })
    }
}
