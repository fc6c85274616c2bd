use serde::Deserialize;

/// Touch count marking a revealed mine the player did not click.
pub const TOUCH_MINE: u8 = 10;
/// Touch count marking the mine the player clicked.
pub const TOUCH_MINE_CLICKED: u8 = 11;

/// Lifecycle of a game as reported by the server.
///
/// The wire carries an integer; `2` is lost and `3` is won, everything else
/// is treated as still active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum GameStatus {
    #[default]
    Active,
    Lost,
    Won,
}

impl From<i64> for GameStatus {
    fn from(value: i64) -> Self {
        match value {
            2 => GameStatus::Lost,
            3 => GameStatus::Won,
            _ => GameStatus::Active,
        }
    }
}

/// Authoritative game metadata, replaced wholesale on sync and game over.
#[derive(Debug, Clone, Deserialize)]
pub struct GameInfo {
    pub id: i64,
    #[serde(rename = "sizeX")]
    pub size_x: u32,
    #[serde(rename = "sizeY")]
    pub size_y: u32,
    pub mines: u32,
    /// Set locally on the first click; the server never confirms it.
    #[serde(rename = "timeStart", default)]
    pub time_start: Option<i64>,
    #[serde(default)]
    pub state: GameStatus,
    /// Server-side timestamps of confirmed requests, appended per delta.
    #[serde(default)]
    pub requests: Vec<i64>,
}

/// Per-cell overlay state: three parallel arrays keyed by the flattened
/// coordinate `sizeY * x + y`. Values are kept as the server sends them
/// (zero is false/empty).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardOverlay {
    /// Opened flags.
    #[serde(default)]
    pub o: Vec<u8>,
    /// Flagged flags.
    #[serde(default)]
    pub f: Vec<u8>,
    /// Neighboring mine count for opened cells, else 0. 10/11 mark mines.
    #[serde(default)]
    pub t: Vec<u8>,
}

impl BoardOverlay {
    /// Pad all three arrays out to the full grid size.
    pub(crate) fn normalize(&mut self, len: usize) {
        self.o.resize(len.max(self.o.len()), 0);
        self.f.resize(len.max(self.f.len()), 0);
        self.t.resize(len.max(self.t.len()), 0);
    }

    pub fn is_open(&self, idx: usize) -> bool {
        self.o.get(idx).copied().unwrap_or(0) != 0
    }

    pub fn is_flagged(&self, idx: usize) -> bool {
        self.f.get(idx).copied().unwrap_or(0) != 0
    }

    pub fn touch_count(&self, idx: usize) -> u8 {
        self.t.get(idx).copied().unwrap_or(0)
    }
}

/// One confirmed delta: the cells a click changed plus its server time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInfo {
    /// Flat run of 5-tuples `(x, y, neighborMineCount, opened, flagged)`.
    #[serde(rename = "touchCells", default)]
    pub touch_cells: Vec<i64>,
    #[serde(default)]
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_from_wire_integer() {
        assert_eq!(GameStatus::from(2), GameStatus::Lost);
        assert_eq!(GameStatus::from(3), GameStatus::Won);
        assert_eq!(GameStatus::from(1), GameStatus::Active);
        assert_eq!(GameStatus::from(0), GameStatus::Active);
    }

    #[test]
    fn game_info_deserializes_with_missing_optionals() {
        let info: GameInfo =
            serde_json::from_str(r#"{"id":7,"sizeX":9,"sizeY":9,"mines":10}"#).unwrap();
        assert_eq!(info.id, 7);
        assert_eq!(info.state, GameStatus::Active);
        assert!(info.time_start.is_none());
        assert!(info.requests.is_empty());
    }

    #[test]
    fn overlay_normalize_pads_to_grid_size() {
        let mut overlay: BoardOverlay =
            serde_json::from_str(r#"{"o":[1],"f":[],"t":[3]}"#).unwrap();
        overlay.normalize(4);
        assert!(overlay.is_open(0));
        assert!(!overlay.is_open(3));
        assert_eq!(overlay.touch_count(0), 3);
        assert_eq!(overlay.t.len(), 4);
    }
}
