//! Fixed action identifiers and their payload shapes.
//!
//! The identifiers are opaque server-assigned strings and must match
//! byte-for-byte; none of them are documented upstream.

use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::models::{BoardOverlay, GameInfo, UpdateInfo};

/// Outbound: start a new game.
pub const ACTION_NEW_GAME: &str = "gn16";
/// Outbound: one click (probe/flag/chord).
pub const ACTION_CLICK: &str = "gu57";
/// Outbound: reattach to an existing game by id.
pub const ACTION_RESTORE_GAME: &str = "gj4";

/// Inbound: full game snapshot.
pub const ACTION_SYNC_GAME: &str = "G69.i41";
/// Inbound: confirmed click delta.
pub const ACTION_CLICK_DELTA: &str = "G68.t18";
/// Inbound: terminal game state.
pub const ACTION_GAME_OVER: &str = "R35.u43";

/// Region literal the server expects in new/restore payloads.
pub const REGION: &str = "CA";

/// Game-type selector for `newGame`; 1 is the beginner 9x9 board.
const GAME_TYPE: i64 = 1;

/// The 13-element `newGame` payload. Everything except the game-type
/// selector and region is constant filler observed on the wire.
pub fn new_game_payload() -> Value {
    json!([
        GAME_TYPE, null, null, null, null, 37, 1, null, REGION, null, null, null, null
    ])
}

/// The `restoreGame` payload for a known game id.
pub fn restore_game_payload(game_id: i64) -> Value {
    json!([game_id, null, REGION, 0])
}

fn field<T: serde::de::DeserializeOwned>(payload: &Value, pos: usize, what: &str) -> Result<T> {
    let value = payload
        .get(pos)
        .cloned()
        .ok_or_else(|| Error::MalformedFrame(format!("{what} missing at position {pos}")))?;
    serde_json::from_value(value).map_err(|e| Error::MalformedFrame(format!("bad {what}: {e}")))
}

/// Payload of [`ACTION_SYNC_GAME`]: `[gameInfo, boardOverlay, history, ..]`.
#[derive(Debug)]
pub struct SyncPayload {
    pub info: GameInfo,
    pub board: BoardOverlay,
    pub history: Vec<UpdateInfo>,
}

impl SyncPayload {
    pub fn from_value(payload: &Value) -> Result<Self> {
        Ok(Self {
            info: field(payload, 0, "game info")?,
            board: field(payload, 1, "board overlay")?,
            history: field(payload, 2, "history")?,
        })
    }
}

/// Payload of [`ACTION_CLICK_DELTA`]: `[actionSeq, gameId, updateInfo, ..]`.
#[derive(Debug)]
pub struct DeltaPayload {
    pub action_seq: i64,
    pub game_id: i64,
    pub update: UpdateInfo,
}

impl DeltaPayload {
    pub fn from_value(payload: &Value) -> Result<Self> {
        Ok(Self {
            action_seq: field(payload, 0, "action sequence")?,
            game_id: field(payload, 1, "game id")?,
            update: field(payload, 2, "update info")?,
        })
    }
}

/// Payload of [`ACTION_GAME_OVER`]:
/// `[gameId, _, gameInfo, user, _, boardOverlay]`.
#[derive(Debug)]
pub struct GameOverPayload {
    pub game_id: i64,
    pub info: GameInfo,
    pub board: BoardOverlay,
}

impl GameOverPayload {
    pub fn from_value(payload: &Value) -> Result<Self> {
        Ok(Self {
            game_id: field(payload, 0, "game id")?,
            info: field(payload, 2, "game info")?,
            board: field(payload, 5, "board overlay")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameStatus;

    #[test]
    fn new_game_payload_matches_wire_capture() {
        assert_eq!(
            serde_json::to_string(&new_game_payload()).unwrap(),
            "[1,null,null,null,null,37,1,null,\"CA\",null,null,null,null]"
        );
    }

    #[test]
    fn restore_payload_matches_wire_capture() {
        assert_eq!(
            serde_json::to_string(&restore_game_payload(123)).unwrap(),
            "[123,null,\"CA\",0]"
        );
    }

    #[test]
    fn sync_payload_parses_positionally() {
        let payload = json!([
            {"id": 4, "sizeX": 9, "sizeY": 9, "mines": 10},
            {"o": [], "f": [], "t": []},
            [],
            "extra",
            null
        ]);
        let sync = SyncPayload::from_value(&payload).unwrap();
        assert_eq!(sync.info.id, 4);
        assert!(sync.history.is_empty());
    }

    #[test]
    fn delta_payload_parses_positionally() {
        let payload = json!([3, 9, {"touchCells": [0, 0, 1, 1, 0], "time": 17}, null, null]);
        let delta = DeltaPayload::from_value(&payload).unwrap();
        assert_eq!(delta.action_seq, 3);
        assert_eq!(delta.game_id, 9);
        assert_eq!(delta.update.touch_cells.len(), 5);
        assert_eq!(delta.update.time, 17);
    }

    #[test]
    fn game_over_payload_parses_positionally() {
        let payload = json!([
            7,
            null,
            {"id": 7, "sizeX": 9, "sizeY": 9, "mines": 10, "state": 2},
            {"name": "someone"},
            null,
            {"o": [1], "f": [], "t": [11]}
        ]);
        let over = GameOverPayload::from_value(&payload).unwrap();
        assert_eq!(over.game_id, 7);
        assert_eq!(over.info.state, GameStatus::Lost);
        assert_eq!(over.board.touch_count(0), 11);
    }

    #[test]
    fn missing_positions_are_malformed() {
        let payload = json!([1]);
        assert!(matches!(
            DeltaPayload::from_value(&payload),
            Err(Error::MalformedFrame(_))
        ));
    }
}
