//! cuemark: serve a time-coded annotation feed, or watch one in step with
//! a simulated player.

mod console;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::sync::Arc;
use std::time::Duration;

use cuemark_sync::{
    parse_timestamp, readiness, video_topic, ClientConfig, CursorPolicy, FeedClient, FeedServer,
    LineRenderer, Playback, ServerConfig, SessionConfig, SimulatedPlayer, SyncController,
    DEFAULT_BACKLOG_LIMIT,
};

#[derive(Parser)]
#[command(name = "cuemark")]
#[command(about = "Time-coded video annotations, kept in sync with playback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the in-memory feed server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:4000")]
        bind: String,
        /// Largest backlog sent on join
        #[arg(long, default_value_t = DEFAULT_BACKLOG_LIMIT)]
        backlog_limit: usize,
        /// Broadcast buffer per topic
        #[arg(
            long,
            default_value_t = 256,
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
        )]
        broadcast_capacity: usize,
    },
    /// Watch a video's annotations and post new ones from stdin
    Watch {
        /// Feed server URL
        #[arg(long, default_value = "ws://127.0.0.1:4000")]
        url: String,
        /// Video id (joins topic `videos:<id>`)
        #[arg(long)]
        video: u64,
        #[arg(long, default_value = "anonymous")]
        username: String,
        /// Reveal loop interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,
        /// Never move the resume cursor backwards
        #[arg(long)]
        monotonic: bool,
        /// Start position (`ss`, `mm:ss` or `h:mm:ss`)
        #[arg(long)]
        start: Option<String>,
        /// Load the player without starting playback
        #[arg(long)]
        paused: bool,
    },
}

struct WatchOptions {
    url: String,
    video: u64,
    username: String,
    tick_ms: u64,
    monotonic: bool,
    start: Option<String>,
    paused: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Serve {
            bind,
            backlog_limit,
            broadcast_capacity,
        } => {
            serve(ServerConfig {
                bind_addr: bind,
                broadcast_capacity,
                backlog_limit,
            })
            .await
        }
        Command::Watch {
            url,
            video,
            username,
            tick_ms,
            monotonic,
            start,
            paused,
        } => {
            watch(WatchOptions {
                url,
                video,
                username,
                tick_ms,
                monotonic,
                start,
                paused,
            })
            .await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let server = FeedServer::new(config);
    info!("Starting feed server on {}...", server.bind_addr());

    tokio::select! {
        result = server.run() => {
            result.with_context(|| format!("feed server on {} stopped", server.bind_addr()))?;
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down after {} connections, {} annotations",
                stats.total_connections, stats.annotations_published
            );
        }
    }
    Ok(())
}

async fn watch(opts: WatchOptions) -> Result<()> {
    let client = Arc::new(FeedClient::new(
        opts.url.as_str(),
        opts.username.as_str(),
        ClientConfig::default(),
    ));
    client
        .connect()
        .await
        .with_context(|| format!("could not connect to {}", opts.url))?;

    let (signal, ready) = readiness();
    let player = Arc::new(SimulatedPlayer::new(signal));
    if let Some(start) = &opts.start {
        player.seek_to(parse_timestamp(start).map_err(anyhow::Error::msg)?);
    }

    let config = SessionConfig {
        tick_interval: Duration::from_millis(opts.tick_ms.max(1)),
        cursor_policy: if opts.monotonic {
            CursorPolicy::Monotonic
        } else {
            CursorPolicy::LastWrite
        },
        ..SessionConfig::default()
    };
    let controller = SyncController::new(
        video_topic(opts.video),
        client.clone(),
        player.clone(),
        LineRenderer::new(std::io::stdout()),
        config,
    );
    let handle = controller.spawn(ready);

    player.load();
    if !opts.paused {
        player.play();
    }
    info!("Watching video {} as {}", opts.video, opts.username);

    let outcome = console::run(&handle, &client, &player).await;
    handle.shutdown().await;
    client.disconnect().await;
    outcome
}
