//! Client for the minesweeper.online websocket protocol.
//!
//! The crate drives the two-phase handshake (short-polling session grant,
//! then an upgrade to a push channel with a probe/ack exchange), keeps the
//! channel alive, and reconstructs the authoritative board state by
//! applying server-confirmed deltas. Cell contents are never predicted
//! locally; only the action type of a click is decided client-side.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mineonline_client::{GameEvent, GameSocket, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> mineonline_client::Result<()> {
//!     let socket = GameSocket::new(SessionConfig {
//!         auth_key: "...".into(),
//!         session: "...".into(),
//!         user_id: "...".into(),
//!         server: "los1".into(),
//!     })?;
//!
//!     let mut events = socket.subscribe_to_events().await;
//!     socket.open().await?;
//!     socket.new_game().await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let GameEvent::SyncGame { game_id } = event {
//!             println!("playing game {game_id}");
//!             socket.click("lc", "4", "4").await?;
//!         }
//!     }
//!
//!     socket.close().await
//! }
//! ```

mod client;
mod error;
mod frame;
mod game;
mod models;
mod protocol;
mod socket;
mod websocket;

pub use client::{SessionClient, SessionConfig};
pub use error::{Error, Result};
pub use frame::{Channel, Frame};
pub use game::{ClickButton, ClickIntent, ClickType, Game};
pub use models::{BoardOverlay, GameInfo, GameStatus, UpdateInfo};
pub use protocol::{
    ACTION_CLICK, ACTION_CLICK_DELTA, ACTION_GAME_OVER, ACTION_NEW_GAME, ACTION_RESTORE_GAME,
    ACTION_SYNC_GAME,
};
pub use socket::{GameEvent, GameSocket};
pub use websocket::PushChannel;
