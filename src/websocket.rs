use std::time::Duration;

use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::frame::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsReader = SplitStream<WsStream>;

/// Period of the liveness frame the client must keep emitting once the
/// channel is up; missing it degrades the connection server-side.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Bounded wait for the probe acknowledgement.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// The upgraded push channel.
///
/// `connect` only returns once the probe/ack exchange has completed, so a
/// live `PushChannel` is always ready for application traffic. All writes
/// (keep-alive and user actions alike) funnel through one mpsc channel
/// into a single writer task.
#[derive(Debug)]
pub struct PushChannel {
    sender: mpsc::UnboundedSender<Frame>,
    reader: WsReader,
    writer_task: JoinHandle<()>,
}

impl PushChannel {
    /// Open the websocket and perform the probe/ack upgrade.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, PROBE_TIMEOUT).await
    }

    async fn connect_with_timeout(url: &str, probe_timeout: Duration) -> Result<Self> {
        debug!("opening push channel");
        let (mut ws_stream, _) = connect_async(url).await?;
        info!("connection opened");

        // No application traffic is valid before the probe exchange.
        ws_stream
            .send(Message::Text(Frame::Probe.encode()?.into()))
            .await?;

        let first = timeout(probe_timeout, ws_stream.next())
            .await
            .map_err(|_| Error::Timeout)?;
        match first {
            Some(Ok(Message::Text(text)))
                if matches!(Frame::decode(&text), Ok(Frame::ProbeAck)) => {}
            Some(Ok(other)) => {
                return Err(Error::HandshakeFailed(format!(
                    "expected probe ack, got {other:?}"
                )));
            }
            Some(Err(e)) => return Err(Error::HandshakeFailed(e.to_string())),
            None => {
                return Err(Error::HandshakeFailed(
                    "channel closed before probe ack".into(),
                ));
            }
        }

        ws_stream
            .send(Message::Text(Frame::Upgrade.encode()?.into()))
            .await?;

        let (mut writer, reader) = ws_stream.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Frame>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = receiver.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode frame: {e}");
                        continue;
                    }
                };

                debug!("sending frame: {text}");
                if let Err(e) = writer.send(Message::Text(text.into())).await {
                    warn!("failed to send frame: {e}");
                    break;
                }
            }

            let _ = writer.close().await;
        });

        Ok(Self {
            sender,
            reader,
            writer_task,
        })
    }

    /// A cloneable handle onto the write side.
    pub fn get_sender(&self) -> mpsc::UnboundedSender<Frame> {
        self.sender.clone()
    }

    /// Receive the next decodable frame. Malformed frames are logged and
    /// dropped; `None` means the connection is closed.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(msg) = self.reader.next().await {
            match msg? {
                Message::Text(text) => {
                    debug!("received frame: {text}");
                    match Frame::decode(&text) {
                        Ok(frame) => return Ok(Some(frame)),
                        Err(e) => warn!("dropping frame: {e}"),
                    }
                }
                Message::Close(_) => {
                    info!("connection closed");
                    return Ok(None);
                }
                _ => {
                    // Ignore websocket-level ping/pong and binary messages.
                }
            }
        }
        Ok(None)
    }

    /// Close the channel, letting the writer task drain and finish.
    pub async fn close(self) -> Result<()> {
        drop(self.sender);
        let _ = self.writer_task.await;
        Ok(())
    }
}

/// Start the keep-alive scheduler: one liveness frame per interval for the
/// life of the connection. The caller owns the handle and must abort it on
/// teardown before the socket goes away.
pub(crate) fn spawn_keep_alive(sender: mpsc::UnboundedSender<Frame>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        // The first tick fires immediately; the probe exchange already
        // proved liveness, so skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            if sender.send(Frame::Ping).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn connect_is_ready_only_after_probe_ack_and_upgrade() {
        let (listener, url) = bind().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            assert_eq!(
                ws.next().await.unwrap().unwrap(),
                Message::Text("2probe".into())
            );
            ws.send(Message::Text("3probe".into())).await.unwrap();
            // The liveness reply goes out only once the upgrade confirm
            // arrives, so receiving it below proves both legs happened.
            assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("5".into()));
            ws.send(Message::Text("3".into())).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let mut channel = PushChannel::connect(&url).await.unwrap();
        assert_eq!(channel.next_frame().await.unwrap(), Some(Frame::Pong));
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_first_frame_fails_the_handshake() {
        let (listener, url) = bind().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.send(Message::Text("3".into())).await;
            while ws.next().await.is_some() {}
        });

        let err = PushChannel::connect(&url).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out_the_probe_wait() {
        let (listener, url) = bind().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // Swallow the probe and never answer.
            while ws.next().await.is_some() {}
        });

        let err = PushChannel::connect_with_timeout(&url, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_emits_ping_frames_on_schedule() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let task = spawn_keep_alive(sender);

        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame, Frame::Ping);
        let frame = receiver.recv().await.unwrap();
        assert_eq!(frame, Frame::Ping);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_stops_when_writer_is_gone() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = spawn_keep_alive(sender);
        drop(receiver);

        // The task exits on its own at the next tick.
        let finished = tokio::time::timeout(KEEP_ALIVE_INTERVAL * 2, task).await;
        assert!(finished.is_ok());
    }
}
