//! Track Correction Session CLI
//!
//! Host process for a correction session. It uses the track-session library
//! and adds:
//! - TOML configuration
//! - A TCP JSON-RPC endpoint polled by the external tracker
//! - Simulated playback streams, optionally ticking on a timer
//! - A reviewer console on stdin

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use track_session::{
    CorrectionSession, PlaybackSynchronizer, RpcBoundary, SessionEvent, SharedSession,
    SimulatedPlayer,
};

mod config;
mod console;
mod server;

use config::AppConfig;
use console::Command;

/// Track Correction Session - Review and relabel multi-object tracks
#[derive(Parser, Debug)]
#[command(name = "track-session")]
#[command(
    about = "Interactive correction session for an external multi-object tracker",
    long_about = None
)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to bind the RPC endpoint to
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Port of the RPC endpoint
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Number of video streams to synchronize
    #[arg(long, value_name = "COUNT")]
    streams: Option<usize>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!("Track Session CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using session library v{}", track_session::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let session = build_session(&config);
    let rpc = RpcBoundary::new(Arc::clone(&session));
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    server::spawn(&addr, rpc)?;

    if config.playback.tick_ms > 0 {
        spawn_ticker(Arc::clone(&session), Duration::from_millis(config.playback.tick_ms))?;
    }

    run_console(&session, &config)
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(streams) = args.streams {
        config.playback.streams = streams;
    }
}

fn build_session(config: &AppConfig) -> SharedSession<SimulatedPlayer> {
    let players = (0..config.playback.streams)
        .map(|_| SimulatedPlayer::at(config.playback.start_frame))
        .collect();
    let mut session =
        CorrectionSession::new(config.session.clone(), PlaybackSynchronizer::new(players));

    let events = session.subscribe();
    thread::spawn(move || {
        for event in events {
            match event {
                SessionEvent::StateChanged(state) => log::debug!("event: state {}", state),
                SessionEvent::StoreChanged { frames } => log::debug!("event: redraw {:?}", frames),
                SessionEvent::PoolChanged => log::debug!("event: identity slots changed"),
                SessionEvent::TargetAdvanced(frame) => log::debug!("event: target {}", frame),
            }
        }
    });

    let frame = session.start();
    log::info!("Review starts at frame {}", frame);
    Arc::new(Mutex::new(session))
}

fn spawn_ticker(session: SharedSession<SimulatedPlayer>, interval: Duration) -> Result<()> {
    thread::Builder::new()
        .name("playback-tick".to_string())
        .spawn(move || loop {
            thread::sleep(interval);
            console::tick(&mut console::lock(&session));
        })
        .context("Failed to start playback thread")?;
    Ok(())
}

fn run_console(session: &SharedSession<SimulatedPlayer>, config: &AppConfig) -> Result<()> {
    println!("{}", console::HELP);
    let display = config.display.size();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => println!("{}", console::execute(session, command, display)),
            Err(e) => eprintln!("{}", e),
        }
        stdout.flush()?;
    }

    log::info!("Session closed");
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
