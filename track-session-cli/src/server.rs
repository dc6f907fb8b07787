//! TCP endpoint for the external tracker
//!
//! Line-delimited JSON-RPC 2.0: every line read from a connection is one
//! request, every response is written back as one line.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use track_session::{PlaybackHandle, RpcBoundary};

/// Bind the endpoint and serve connections on a background thread
pub fn spawn<H>(addr: &str, rpc: RpcBoundary<H>) -> Result<thread::JoinHandle<()>>
where
    H: PlaybackHandle + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("Failed to bind RPC endpoint on {}", addr))?;
    log::info!("RPC endpoint listening on {}", addr);

    let handle = thread::Builder::new()
        .name("rpc-accept".to_string())
        .spawn(move || accept_loop(listener, rpc))
        .context("Failed to start RPC thread")?;
    Ok(handle)
}

fn accept_loop<H>(listener: TcpListener, rpc: RpcBoundary<H>)
where
    H: PlaybackHandle + Send + 'static,
{
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let rpc = rpc.clone();
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                log::info!("Tracker connected from {}", peer);
                thread::spawn(move || {
                    if let Err(e) = serve_connection(stream, &rpc) {
                        log::warn!("Connection {} closed with error: {:#}", peer, e);
                    } else {
                        log::info!("Tracker {} disconnected", peer);
                    }
                });
            }
            Err(e) => log::warn!("Failed to accept connection: {}", e),
        }
    }
}

fn serve_connection<H: PlaybackHandle>(stream: TcpStream, rpc: &RpcBoundary<H>) -> Result<()> {
    let mut writer = stream.try_clone().context("Failed to clone connection")?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = line.context("Failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        log::trace!("<- {}", line);
        if let Some(response) = rpc.dispatch(&line) {
            log::trace!("-> {}", response);
            writeln!(writer, "{}", response).context("Failed to write response")?;
            writer.flush()?;
        }
    }
    Ok(())
}
