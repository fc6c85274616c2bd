use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{SessionClient, SessionConfig};
use crate::error::{Error, Result};
use crate::frame::{Channel, Frame};
use crate::game::{ClickButton, Game, parse_coord};
use crate::models::GameStatus;
use crate::protocol::{
    ACTION_CLICK, ACTION_CLICK_DELTA, ACTION_GAME_OVER, ACTION_NEW_GAME, ACTION_RESTORE_GAME,
    ACTION_SYNC_GAME, DeltaPayload, GameOverPayload, SyncPayload, new_game_payload,
    restore_game_payload,
};
use crate::websocket::{PushChannel, spawn_keep_alive};

/// Events emitted as server traffic mutates the local game.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// A full snapshot replaced the local game.
    SyncGame { game_id: i64 },
    /// A confirmed click delta was applied.
    ClickApplied {
        action_seq: i64,
        changed_cells: Vec<(u32, u32)>,
    },
    /// The game reached a terminal state.
    GameOver { game_id: i64, won: bool },
    /// A delta failed validation; the local board may be stale and a sync
    /// or restore is advisable.
    OutOfSync { message: String },
    /// The push channel went away.
    ConnectionLost,
}

type EventsHandle = Arc<RwLock<Option<mpsc::UnboundedSender<GameEvent>>>>;
type GameHandle = Arc<RwLock<Option<Game>>>;
type ConnectionHandle = Arc<RwLock<Option<ConnectionState>>>;

/// Live connection resources - all present while connected.
struct ConnectionState {
    sender: mpsc::UnboundedSender<Frame>,
    keep_alive_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
}

impl ConnectionState {
    fn send_frame(&self, frame: Frame) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Tear down in order: keep-alive first so nothing writes to a dead
    /// channel, then the listener, which drops the socket halves.
    async fn shutdown(self) {
        self.keep_alive_task.abort();
        self.listener_task.abort();
        let _ = self.keep_alive_task.await;
        let _ = self.listener_task.await;
    }
}

/// High-level client: owns the connection lifecycle and keeps the local
/// game consistent with server-confirmed state.
pub struct GameSocket {
    session: SessionClient,
    connection: ConnectionHandle,
    game: GameHandle,
    event_sender: EventsHandle,
}

impl GameSocket {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self {
            session: SessionClient::new(config)?,
            connection: Arc::new(RwLock::new(None)),
            game: Arc::new(RwLock::new(None)),
            event_sender: Arc::new(RwLock::new(None)),
        })
    }

    /// Subscribe to game events. Replaces any previous subscriber.
    pub async fn subscribe_to_events(&self) -> mpsc::UnboundedReceiver<GameEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.event_sender.write().await = Some(sender);
        receiver
    }

    /// Run the full handshake and bring up the push channel.
    ///
    /// Holding the connection write lock for the whole sequence makes the
    /// open resolve or fail exactly once; a failed open leaves no partial
    /// connection behind and is not retried automatically.
    pub async fn open(&self) -> Result<()> {
        let mut conn = self.connection.write().await;

        if let Some(existing) = conn.take() {
            existing.shutdown().await;
        }

        let sid = self.session.request_session().await?;
        self.session.authorize_session(&sid).await?;
        let url = self.session.websocket_url(&sid)?;

        let channel = PushChannel::connect(&url).await?;
        let sender = channel.get_sender();
        let keep_alive_task = spawn_keep_alive(sender.clone());
        let listener_task = self.start_listener(channel);

        *conn = Some(ConnectionState {
            sender,
            keep_alive_task,
            listener_task,
        });

        info!("connection ready");
        Ok(())
    }

    /// Close the connection. Idempotent; the local game is left as
    /// last-known-good.
    pub async fn close(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        if let Some(existing) = conn.take() {
            existing.shutdown().await;
            info!("connection closed");
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Clone of the current game state, if one has been synced.
    pub async fn game_snapshot(&self) -> Option<Game> {
        self.game.read().await.clone()
    }

    async fn send_action(&self, action: &str, payload: Value) -> Result<()> {
        let conn = self.connection.read().await;
        let conn = conn.as_ref().ok_or(Error::NotConnected)?;
        conn.send_frame(Frame::request(action, payload))
    }

    /// Ask the server for a fresh game.
    pub async fn new_game(&self) -> Result<()> {
        debug!("starting new game");
        self.send_action(ACTION_NEW_GAME, new_game_payload()).await
    }

    /// Issue one click. Button and coordinates arrive as user text and are
    /// validated here; the intent engine decides probe/flag/chord.
    pub async fn click(&self, button: &str, x: &str, y: &str) -> Result<()> {
        let button: ClickButton = button.parse()?;
        let x = parse_coord(x)?;
        let y = parse_coord(y)?;

        let payload = {
            let mut guard = self.game.write().await;
            let game = guard.as_mut().ok_or(Error::NoGame)?;
            game.click_payload(button, x, y, now_ms())?
        };

        self.send_action(ACTION_CLICK, payload).await
    }

    /// Reattach to an existing game by id; the server answers with a sync.
    pub async fn restore_game(&self, id: &str) -> Result<()> {
        let id: i64 = id
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("game id {id:?} is not an integer")))?;
        self.send_action(ACTION_RESTORE_GAME, restore_game_payload(id))
            .await
    }

    fn start_listener(&self, channel: PushChannel) -> JoinHandle<()> {
        let game = self.game.clone();
        let events = self.event_sender.clone();
        let connection = self.connection.clone();

        tokio::spawn(async move {
            let sender = channel.get_sender();
            Self::listen(channel, game, events).await;
            // The channel is gone; drop the connection state so the
            // keep-alive stops and `is_connected` turns false.
            Self::release_connection(&connection, &sender).await;
        })
    }

    /// Clear the connection slot a finished listener belonged to and
    /// cancel its keep-alive. A replacement connection installed by a
    /// concurrent `open` is left alone.
    async fn release_connection(
        connection: &ConnectionHandle,
        sender: &mpsc::UnboundedSender<Frame>,
    ) {
        let mut conn = connection.write().await;
        match conn.take() {
            Some(state) if state.sender.same_channel(sender) => {
                state.keep_alive_task.abort();
                let _ = state.keep_alive_task.await;
            }
            other => *conn = other,
        }
    }

    /// Single inbound path: frames are processed strictly in arrival
    /// order, so game mutation needs no further synchronization.
    async fn listen(mut channel: PushChannel, game: GameHandle, events: EventsHandle) {
        loop {
            match channel.next_frame().await {
                Ok(Some(frame)) => Self::route_frame(frame, &game, &events).await,
                Ok(None) => {
                    emit(&events, GameEvent::ConnectionLost).await;
                    break;
                }
                Err(e) => {
                    warn!("error receiving frame: {e}");
                    emit(&events, GameEvent::ConnectionLost).await;
                    break;
                }
            }
        }
    }

    async fn route_frame(frame: Frame, game: &GameHandle, events: &EventsHandle) {
        match frame {
            // Liveness traffic in either direction is a no-op.
            Frame::Pong | Frame::Ping => {}
            Frame::Message {
                channel: Channel::Response,
                action,
                payload,
                ..
            } => {
                if let Err(e) = Self::handle_action(&action, &payload, game, events).await {
                    match e {
                        Error::Mismatch(message) => {
                            error!("{message}");
                            emit(events, GameEvent::OutOfSync { message }).await;
                        }
                        other => warn!("dropping {action}: {other}"),
                    }
                }
            }
            Frame::Message {
                channel: Channel::Request,
                action,
                ..
            } => debug!("ignoring request-channel message {action}"),
            other => warn!("unexpected control frame: {other:?}"),
        }
    }

    async fn handle_action(
        action: &str,
        payload: &Value,
        game: &GameHandle,
        events: &EventsHandle,
    ) -> Result<()> {
        match action {
            ACTION_SYNC_GAME => {
                let sync = SyncPayload::from_value(payload)?;
                let new_game = Game::new(sync.info, sync.board, sync.history);
                let game_id = new_game.id();
                *game.write().await = Some(new_game);

                info!("game {game_id} started");
                emit(events, GameEvent::SyncGame { game_id }).await;
            }
            ACTION_CLICK_DELTA => {
                let delta = DeltaPayload::from_value(payload)?;
                let changed_cells = {
                    let mut guard = game.write().await;
                    let game = guard.as_mut().ok_or(Error::NoGame)?;
                    game.apply_delta(delta.action_seq, delta.game_id, delta.update)?
                };

                debug!(
                    "applied delta {} to game {} ({} cells)",
                    delta.action_seq,
                    delta.game_id,
                    changed_cells.len()
                );
                emit(
                    events,
                    GameEvent::ClickApplied {
                        action_seq: delta.action_seq,
                        changed_cells,
                    },
                )
                .await;
            }
            ACTION_GAME_OVER => {
                let over = GameOverPayload::from_value(payload)?;
                let game_id = over.game_id;
                let won = over.info.state == GameStatus::Won;
                {
                    let mut guard = game.write().await;
                    let game = guard.as_mut().ok_or(Error::NoGame)?;
                    game.finish(over.game_id, over.info, over.board)?;
                }

                info!("game {game_id} over: {}", if won { "won" } else { "lost" });
                emit(events, GameEvent::GameOver { game_id, won }).await;
            }
            other => warn!("received unhandled action {other}"),
        }
        Ok(())
    }
}

async fn emit(events: &EventsHandle, event: GameEvent) {
    if let Some(sender) = &*events.read().await {
        let _ = sender.send(event);
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    use super::*;

    fn socket() -> GameSocket {
        GameSocket::new(SessionConfig {
            auth_key: "key".into(),
            session: "sess".into(),
            user_id: "1".into(),
            server: "los1".into(),
        })
        .unwrap()
    }

    fn handles() -> (GameHandle, EventsHandle) {
        (Arc::new(RwLock::new(None)), Arc::new(RwLock::new(None)))
    }

    fn sync_payload(game_id: i64) -> Value {
        json!([
            {"id": game_id, "sizeX": 9, "sizeY": 9, "mines": 10},
            {"o": [], "f": [], "t": []},
            []
        ])
    }

    #[tokio::test]
    async fn commands_before_open_report_errors() {
        let socket = socket();
        assert!(matches!(socket.new_game().await, Err(Error::NotConnected)));
        assert!(matches!(
            socket.click("lc", "0", "0").await,
            Err(Error::NoGame)
        ));
        assert!(matches!(
            socket.restore_game("12").await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            socket.restore_game("twelve").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn close_without_connection_is_idempotent() {
        let socket = socket();
        socket.close().await.unwrap();
        socket.close().await.unwrap();
        assert!(!socket.is_connected().await);
    }

    #[tokio::test]
    async fn sync_action_installs_a_game_and_emits() {
        let (game, events) = handles();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        *events.write().await = Some(sender);

        GameSocket::handle_action(ACTION_SYNC_GAME, &sync_payload(5), &game, &events)
            .await
            .unwrap();

        assert_eq!(game.read().await.as_ref().unwrap().id(), 5);
        assert!(matches!(
            receiver.recv().await,
            Some(GameEvent::SyncGame { game_id: 5 })
        ));
    }

    #[tokio::test]
    async fn delta_action_mutates_the_board_in_order() {
        let (game, events) = handles();
        GameSocket::handle_action(ACTION_SYNC_GAME, &sync_payload(5), &game, &events)
            .await
            .unwrap();

        let delta = json!([0, 5, {"touchCells": [0, 0, 1, 1, 0], "time": 3}]);
        GameSocket::handle_action(ACTION_CLICK_DELTA, &delta, &game, &events)
            .await
            .unwrap();

        let guard = game.read().await;
        let current = guard.as_ref().unwrap();
        assert!(current.board().is_open(0));
        assert_eq!(current.action_count(), 1);
    }

    #[tokio::test]
    async fn cross_game_delta_is_a_mismatch() {
        let (game, events) = handles();
        GameSocket::handle_action(ACTION_SYNC_GAME, &sync_payload(1), &game, &events)
            .await
            .unwrap();

        let delta = json!([0, 2, {"touchCells": [0, 0, 1, 1, 0], "time": 3}]);
        let err = GameSocket::handle_action(ACTION_CLICK_DELTA, &delta, &game, &events)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Mismatch(_)));
        assert!(!game.read().await.as_ref().unwrap().board().is_open(0));
    }

    #[tokio::test]
    async fn game_over_action_ends_the_game_and_emits() {
        let (game, events) = handles();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        *events.write().await = Some(sender);

        GameSocket::handle_action(ACTION_SYNC_GAME, &sync_payload(5), &game, &events)
            .await
            .unwrap();
        // Drain the sync event.
        receiver.recv().await.unwrap();

        let over = json!([
            5,
            null,
            {"id": 5, "sizeX": 9, "sizeY": 9, "mines": 10, "state": 3},
            {"name": "someone"},
            null,
            {"o": [], "f": [], "t": []}
        ]);
        GameSocket::handle_action(ACTION_GAME_OVER, &over, &game, &events)
            .await
            .unwrap();

        assert_eq!(
            game.read().await.as_ref().unwrap().status(),
            GameStatus::Won
        );
        assert!(matches!(
            receiver.recv().await,
            Some(GameEvent::GameOver {
                game_id: 5,
                won: true
            })
        ));
    }

    #[tokio::test]
    async fn inbound_liveness_frames_are_no_ops() {
        let (game, events) = handles();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        *events.write().await = Some(sender);

        GameSocket::route_frame(Frame::Ping, &game, &events).await;
        GameSocket::route_frame(Frame::Pong, &game, &events).await;

        assert!(receiver.try_recv().is_err());
        assert!(game.read().await.is_none());
    }

    #[tokio::test]
    async fn release_cancels_keep_alive_for_its_own_connection_only() {
        let socket = socket();
        let (sender, _receiver) = mpsc::unbounded_channel();
        let keep_alive_task = spawn_keep_alive(sender.clone());
        let listener_task = tokio::spawn(async {});
        *socket.connection.write().await = Some(ConnectionState {
            sender: sender.clone(),
            keep_alive_task,
            listener_task,
        });

        // A sender from some other channel must not release the slot.
        let (stranger, _stranger_receiver) = mpsc::unbounded_channel();
        GameSocket::release_connection(&socket.connection, &stranger).await;
        assert!(socket.is_connected().await);

        // The matching sender takes it down, keep-alive included.
        GameSocket::release_connection(&socket.connection, &sender).await;
        assert!(!socket.is_connected().await);
    }

    #[tokio::test]
    async fn remote_close_tears_down_the_connection() {
        let socket = socket();
        let mut events = socket.subscribe_to_events().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await; // probe
            ws.send(Message::Text("3probe".into())).await.unwrap();
            let _ = ws.next().await; // upgrade confirm
            let _ = ws.next().await; // go-ahead from the client
            ws.close(None).await.unwrap();
        });

        let channel = PushChannel::connect(&url).await.unwrap();
        let sender = channel.get_sender();
        let keep_alive_task = spawn_keep_alive(sender.clone());
        let listener_task = socket.start_listener(channel);
        *socket.connection.write().await = Some(ConnectionState {
            sender,
            keep_alive_task,
            listener_task,
        });
        assert!(socket.is_connected().await);

        // Only signal the server once the connection state is installed,
        // so the close cannot race the setup above.
        socket
            .connection
            .read()
            .await
            .as_ref()
            .unwrap()
            .send_frame(Frame::Ping)
            .unwrap();

        // The listener must notice the close and clear the slot itself.
        tokio::time::timeout(Duration::from_secs(5), async {
            while socket.is_connected().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(
            events.recv().await,
            Some(GameEvent::ConnectionLost)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unhandled_action_is_not_an_error() {
        let (game, events) = handles();
        GameSocket::handle_action("Z99.x00", &json!([]), &game, &events)
            .await
            .unwrap();
        assert!(game.read().await.is_none());
    }
}
