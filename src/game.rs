use std::fmt;
use std::str::FromStr;

use serde_json::{Value, json};
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{
    BoardOverlay, GameInfo, GameStatus, TOUCH_MINE, TOUCH_MINE_CLICKED, UpdateInfo,
};

/// Mouse button a user command resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickButton {
    Left,
    Right,
}

impl FromStr for ClickButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leftClick" | "lc" | "l" => Ok(ClickButton::Left),
            "rightClick" | "rc" | "r" => Ok(ClickButton::Right),
            other => Err(Error::InvalidInput(format!(
                "unknown click button {other:?}"
            ))),
        }
    }
}

/// Protocol-level click kind. The wire codes are fixed; 2 is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    Probe,
    Flag,
    Chord,
}

impl ClickType {
    pub fn code(&self) -> i64 {
        match self {
            ClickType::Probe => 0,
            ClickType::Flag => 1,
            ClickType::Chord => 3,
        }
    }
}

/// What one user click is about to ask the server to do.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickIntent {
    pub click_type: ClickType,
    pub x: u32,
    pub y: u32,
    /// Cells the server is expected to touch. Empty for a chord whose
    /// flagged-neighbor count does not match (still sent as a no-op).
    pub touched_cells: Vec<(u32, u32)>,
}

/// Parse a user-supplied coordinate string.
pub fn parse_coord(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::InvalidInput(format!("coordinate {s:?} is not an integer")))
}

/// Authoritative client-side view of one game: metadata, cell overlay, and
/// the append-only history of confirmed deltas.
///
/// Cell contents are only ever written by server-confirmed deltas; the one
/// optimistic local write is the start timestamp on the first click.
#[derive(Debug, Clone)]
pub struct Game {
    info: GameInfo,
    board: BoardOverlay,
    history: Vec<UpdateInfo>,
}

impl Game {
    pub fn new(info: GameInfo, mut board: BoardOverlay, history: Vec<UpdateInfo>) -> Self {
        board.normalize((info.size_x * info.size_y) as usize);
        Self {
            info,
            board,
            history,
        }
    }

    pub fn info(&self) -> &GameInfo {
        &self.info
    }

    pub fn board(&self) -> &BoardOverlay {
        &self.board
    }

    pub fn id(&self) -> i64 {
        self.info.id
    }

    pub fn size_x(&self) -> u32 {
        self.info.size_x
    }

    pub fn size_y(&self) -> u32 {
        self.info.size_y
    }

    pub fn mines(&self) -> u32 {
        self.info.mines
    }

    pub fn status(&self) -> GameStatus {
        self.info.state
    }

    /// Number of confirmed actions; also the next expected sequence number.
    pub fn action_count(&self) -> usize {
        self.history.len()
    }

    /// A game is active once its local timer has started.
    pub fn is_active(&self) -> bool {
        self.info.time_start.is_some()
    }

    fn start(&mut self, now_ms: i64) {
        self.info.time_start = Some(now_ms);
    }

    pub fn time_elapsed(&self, now_ms: i64) -> Option<i64> {
        self.info.time_start.map(|start| now_ms - start)
    }

    fn cell_count(&self) -> usize {
        (self.info.size_x * self.info.size_y) as usize
    }

    /// Flatten grid coordinates to the server's column-major index.
    pub fn coord_to_idx(&self, x: u32, y: u32) -> usize {
        (self.info.size_y * x + y) as usize
    }

    /// The up-to-8 grid neighbors of a cell, in the protocol's clockwise
    /// order, restricted to true 2-D bounds (no wraparound at columns).
    pub fn neighbor_coords(&self, x: u32, y: u32) -> Vec<(u32, u32)> {
        let (x, y) = (x as i64, y as i64);
        let (sx, sy) = (self.info.size_x as i64, self.info.size_y as i64);
        [
            (x - 1, y - 1),
            (x, y - 1),
            (x + 1, y - 1),
            (x + 1, y),
            (x + 1, y + 1),
            (x, y + 1),
            (x - 1, y + 1),
            (x - 1, y),
        ]
        .into_iter()
        .filter(|&(nx, ny)| nx >= 0 && nx < sx && ny >= 0 && ny < sy)
        .map(|(nx, ny)| (nx as u32, ny as u32))
        .collect()
    }

    fn button_to_click_type(&self, button: ClickButton, x: u32, y: u32) -> Result<ClickType> {
        match button {
            ClickButton::Right => Ok(ClickType::Flag),
            ClickButton::Left => {
                let idx = self.coord_to_idx(x, y);
                if self.board.is_flagged(idx) {
                    return Err(Error::InvalidInput(format!(
                        "cell ({x}, {y}) is flagged"
                    )));
                }
                if self.board.is_open(idx) {
                    Ok(ClickType::Chord)
                } else {
                    Ok(ClickType::Probe)
                }
            }
        }
    }

    fn touched_cells(&self, click_type: ClickType, x: u32, y: u32) -> Vec<(u32, u32)> {
        match click_type {
            ClickType::Probe | ClickType::Flag => vec![(x, y)],
            ClickType::Chord => {
                let neighbors = self.neighbor_coords(x, y);
                let mine_count = self.board.touch_count(self.coord_to_idx(x, y));
                let flagged = neighbors
                    .iter()
                    .filter(|&&(nx, ny)| self.board.is_flagged(self.coord_to_idx(nx, ny)))
                    .count();

                // Chord only fires when the flag count matches exactly;
                // otherwise the server expects an empty touch list.
                if flagged != mine_count as usize {
                    return Vec::new();
                }

                neighbors
                    .into_iter()
                    .filter(|&(nx, ny)| {
                        let idx = self.coord_to_idx(nx, ny);
                        !self.board.is_open(idx) && !self.board.is_flagged(idx)
                    })
                    .collect()
            }
        }
    }

    /// Resolve a user click into the protocol action type and the exact
    /// cell set the server is expected to touch.
    ///
    /// The first click on an inactive game starts the local timer; nothing
    /// else is predicted locally.
    pub fn click_intent(
        &mut self,
        button: ClickButton,
        x: u32,
        y: u32,
        now_ms: i64,
    ) -> Result<ClickIntent> {
        if self.info.state != GameStatus::Active {
            return Err(Error::NoGame);
        }
        if x >= self.info.size_x || y >= self.info.size_y {
            return Err(Error::InvalidInput(format!(
                "({x}, {y}) is outside the {}x{} grid",
                self.info.size_x, self.info.size_y
            )));
        }

        let click_type = self.button_to_click_type(button, x, y)?;

        if !self.is_active() {
            self.start(now_ms);
        }

        Ok(ClickIntent {
            click_type,
            x,
            y,
            touched_cells: self.touched_cells(click_type, x, y),
        })
    }

    /// Build the ordered 10-element `click` payload. The trailing three
    /// fields are fixed protocol filler reproduced verbatim.
    pub fn click_payload(
        &mut self,
        button: ClickButton,
        x: u32,
        y: u32,
        now_ms: i64,
    ) -> Result<Value> {
        let intent = self.click_intent(button, x, y, now_ms)?;
        Ok(json!([
            self.action_count(),
            self.id(),
            intent.click_type.code(),
            intent.x,
            intent.y,
            self.time_elapsed(now_ms),
            intent.touched_cells,
            "",
            null,
            null
        ]))
    }

    /// Apply one confirmed click delta. Returns the cells that changed.
    ///
    /// The sequence check is the only defense against reordered or
    /// duplicated deltas; on any mismatch the board is left untouched.
    pub fn apply_delta(
        &mut self,
        action_seq: i64,
        game_id: i64,
        update: UpdateInfo,
    ) -> Result<Vec<(u32, u32)>> {
        if game_id != self.info.id {
            return Err(Error::Mismatch(format!(
                "game id mismatch: have {}, delta is for {game_id}",
                self.info.id
            )));
        }
        if action_seq != self.history.len() as i64 {
            return Err(Error::Mismatch(format!(
                "action sequence mismatch: expected {}, got {action_seq}",
                self.history.len()
            )));
        }

        let mut changed = Vec::new();
        for cell in update.touch_cells.chunks_exact(5) {
            let (x, y, count, opened, flagged) = (cell[0], cell[1], cell[2], cell[3], cell[4]);
            let idx = self.info.size_y as i64 * x + y;
            if x < 0 || y < 0 || idx < 0 || idx as usize >= self.cell_count() {
                warn!("delta touches out-of-range cell ({x}, {y}), skipping");
                continue;
            }
            let idx = idx as usize;
            self.board.t[idx] = if opened != 0 { count as u8 } else { 0 };
            self.board.o[idx] = (opened != 0) as u8;
            self.board.f[idx] = (flagged != 0) as u8;
            changed.push((x as u32, y as u32));
        }

        self.info.requests.push(update.time);
        self.history.push(update);
        Ok(changed)
    }

    /// Replace the game wholesale from a game-over payload. The game is
    /// terminal afterwards; clicks are rejected until the next sync.
    pub fn finish(&mut self, game_id: i64, info: GameInfo, mut board: BoardOverlay) -> Result<()> {
        if game_id != self.info.id {
            return Err(Error::Mismatch(format!(
                "game id mismatch on game over: have {}, got {game_id}",
                self.info.id
            )));
        }
        board.normalize((info.size_x * info.size_y) as usize);
        self.info = info;
        self.board = board;
        Ok(())
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.info.size_y {
            for x in 0..self.info.size_x {
                let idx = self.coord_to_idx(x, y);
                let c = if self.board.is_open(idx) {
                    match self.board.touch_count(idx) {
                        0 => '.',
                        TOUCH_MINE => 'b',
                        TOUCH_MINE_CLICKED => 'B',
                        n => char::from_digit(n as u32, 10).unwrap_or('?'),
                    }
                } else if self.board.is_flagged(idx) {
                    'f'
                } else {
                    'x'
                };
                write!(f, "{c}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
