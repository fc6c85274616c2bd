use thiserror::Error;

/// Error type for all client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Unparseable button/coordinates, out-of-grid click, or a left-click
    /// on a flagged cell. The session is unaffected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No synced game to act on, or the current game already ended and no
    /// new sync has arrived yet.
    #[error("no active game")]
    NoGame,

    /// Game id or action sequence disagreement between a server delta and
    /// local state. The local board may be stale; sync or restore.
    #[error("state mismatch: {0}")]
    Mismatch(String),

    /// Inbound bytes that do not decode as a known frame. Dropped with a
    /// warning, never fatal.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The handshake did not reach the ready state.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server refused to authorize the session id.
    #[error("session not authorized")]
    AuthorizationFailed,

    /// A bounded wait on a handshake step elapsed.
    #[error("operation timed out")]
    Timeout,

    /// An operation that needs an open connection was called before `open`.
    #[error("not connected")]
    NotConnected,

    /// The push channel writer is gone.
    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
