use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use mineonline_client::{Error, GameEvent, GameSocket, Result, SessionConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Interactive client for minesweeper.online.
#[derive(Parser)]
#[command(name = "mineonline", version, about)]
struct Args {
    /// Account auth key.
    #[arg(long)]
    auth_key: String,

    /// Browser session token.
    #[arg(long)]
    session: String,

    /// Numeric user id.
    #[arg(long)]
    user_id: String,

    /// Server shard to connect to.
    #[arg(long, default_value = "los1")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let socket = Arc::new(GameSocket::new(SessionConfig {
        auth_key: args.auth_key,
        session: args.session,
        user_id: args.user_id,
        server: args.server,
    })?);

    let mut events = socket.subscribe_to_events().await;
    let event_socket = socket.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                GameEvent::ClickApplied { .. } => {
                    if let Some(game) = event_socket.game_snapshot().await {
                        println!("{game}");
                    }
                }
                GameEvent::OutOfSync { .. } => {
                    warn!("local state may be stale; use restoreGame to resync");
                }
                GameEvent::ConnectionLost => warn!("connection lost; use open to reconnect"),
                _ => {}
            }
        }
    });

    socket.open().await?;
    command_loop(&socket).await?;
    socket.close().await
}

async fn command_loop(socket: &GameSocket) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = parts.first() else {
            continue;
        };

        let result = match (command, &parts[1..]) {
            ("open", _) => socket.open().await,
            ("close", _) => socket.close().await,
            ("newGame" | "new", _) => socket.new_game().await,
            ("click", [button, x, y]) => socket.click(button, x, y).await,
            ("click", _) => Err(Error::InvalidInput("usage: click <button> <x> <y>".into())),
            ("restoreGame" | "restore", [id]) => socket.restore_game(id).await,
            ("restoreGame" | "restore", _) => {
                Err(Error::InvalidInput("usage: restoreGame <id>".into()))
            }
            ("board", _) => {
                match socket.game_snapshot().await {
                    Some(game) => println!("{game}"),
                    None => println!("no game yet; newGame or restoreGame first"),
                }
                Ok(())
            }
            ("quit" | "exit", _) => return Ok(()),
            (other, _) => {
                println!("unknown command: {other}");
                Ok(())
            }
        };

        // Every command error renders as exactly one message; nothing here
        // is fatal to the session.
        if let Err(err) = result {
            match err {
                Error::NoGame => warn!("couldn't complete because no game"),
                other => warn!("{other}"),
            }
        }
    }
}
