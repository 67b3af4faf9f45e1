//! Line-based stdin control for `cuemark watch`.
//!
//! `/seek 1:30`, `/play`, `/pause`, `/reconnect`, `/status` and `/quit`
//! are commands; any other non-empty line is posted as an annotation at the
//! current playback position.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use cuemark_sync::{
    format_timestamp, parse_timestamp, FeedClient, Playback, SessionHandle, SimulatedPlayer,
};

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Seek(u64),
    Play,
    Pause,
    Reconnect,
    Status,
    Quit,
    Post(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Post(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name {
        "seek" => ConsoleCommand::Seek(parse_timestamp(arg)?),
        "play" => ConsoleCommand::Play,
        "pause" => ConsoleCommand::Pause,
        "reconnect" => ConsoleCommand::Reconnect,
        "status" => ConsoleCommand::Status,
        "quit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: /{other}")),
    };
    Ok(Some(command))
}

/// Read commands until `/quit`, end of input or Ctrl-C.
pub async fn run(handle: &SessionHandle, client: &FeedClient, player: &SimulatedPlayer) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Seek(ms) => handle.seek(ms).await?,
            ConsoleCommand::Play => player.play(),
            ConsoleCommand::Pause => player.pause(),
            ConsoleCommand::Reconnect => {
                if let Err(e) = client.reconnect().await {
                    log::warn!("Reconnect failed: {e}");
                }
            }
            ConsoleCommand::Status => {
                let snapshot = handle.snapshot().await?;
                eprintln!(
                    "{:?} at {} | cursor {:?} | {} pending, {} revealed",
                    handle.status(),
                    format_timestamp(player.current_time_ms()),
                    snapshot.last_seen_id,
                    snapshot.pending,
                    snapshot.revealed
                );
            }
            ConsoleCommand::Quit => break,
            ConsoleCommand::Post(body) => {
                if let Err(e) = handle.post(body).await {
                    eprintln!("{e}");
                }
            }
        }
    }
    Ok(())
}
