//! Reviewer console
//!
//! Line commands standing in for the display collaborator: clicks on a
//! stream, manual flush, playback control and inspection.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use track_session::{
    CorrectionSession, DisplaySize, FrameNumber, LocalPoint, ObjectId, PlaybackHandle,
    SessionError, SharedSession, SimulatedPlayer, SourceIndex,
};

pub const HELP: &str = "\
Commands:
  click <src> <x> <y>   record a correction at local point (x, y) on stream <src>
  flush                 make the current corrections ready for the tracker
  target <frame> [seek] drive playback toward <frame>
  sync                  pause all streams at the slowest stream's frame
  tick [n]              decode n frames on every playing stream (default 1)
  pool                  show assignable ids
  refill <ids..>        replace assignable ids
  frame <n>             show tracked objects on frame <n>
  status                show session state
  quit                  stop the session";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Click {
        source: SourceIndex,
        point: LocalPoint,
    },
    Flush,
    Target {
        frame: FrameNumber,
        seek: bool,
    },
    Sync,
    Tick(u32),
    Pool,
    Refill(Vec<ObjectId>),
    Frame(FrameNumber),
    Status,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0} (type 'help')")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),
}

fn number<T: FromStr>(token: &str) -> Result<T, CommandError> {
    token
        .parse()
        .map_err(|_| CommandError::InvalidNumber(token.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = tokens.split_first() else {
            return Err(CommandError::Usage("help"));
        };

        match (name, args) {
            ("click", [src, x, y]) => Ok(Command::Click {
                source: number(src)?,
                point: LocalPoint::new(number(x)?, number(y)?),
            }),
            ("click", _) => Err(CommandError::Usage("click <src> <x> <y>")),
            ("flush", []) => Ok(Command::Flush),
            ("target", [frame]) => Ok(Command::Target {
                frame: number(frame)?,
                seek: false,
            }),
            ("target", [frame, "seek"]) => Ok(Command::Target {
                frame: number(frame)?,
                seek: true,
            }),
            ("target", _) => Err(CommandError::Usage("target <frame> [seek]")),
            ("sync", []) => Ok(Command::Sync),
            ("tick", []) => Ok(Command::Tick(1)),
            ("tick", [n]) => Ok(Command::Tick(number(n)?)),
            ("pool", []) => Ok(Command::Pool),
            ("refill", ids) => Ok(Command::Refill(
                ids.iter().map(|t| number(t)).collect::<Result<_, _>>()?,
            )),
            ("frame", [n]) => Ok(Command::Frame(number(n)?)),
            ("frame", _) => Err(CommandError::Usage("frame <n>")),
            ("status", []) => Ok(Command::Status),
            ("help", _) => Ok(Command::Help),
            ("quit" | "exit", _) => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(line.trim().to_string())),
        }
    }
}

/// Decode one frame on every playing stream and report it back
pub fn tick(session: &mut CorrectionSession<SimulatedPlayer>) {
    let playback = session.playback_mut();
    let decoded: Vec<_> = playback.handles_mut().iter_mut().map(|h| h.step()).collect();
    for (stream, frame) in decoded.into_iter().enumerate() {
        if let Some(frame) = frame {
            playback.on_frame_ready(stream, frame);
        }
    }
}

pub fn lock(
    session: &Mutex<CorrectionSession<SimulatedPlayer>>,
) -> MutexGuard<'_, CorrectionSession<SimulatedPlayer>> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one command; returns the text to show the reviewer
pub fn execute(
    session: &SharedSession<SimulatedPlayer>,
    command: Command,
    display: DisplaySize,
) -> String {
    let mut session = lock(session);

    match command {
        Command::Click { source, point } => {
            match session.record_correction(point, source, display) {
                Ok(entry) => format!(
                    "id {} -> ({:.1}, {:.1}) on stream {} [{}]",
                    entry.id,
                    entry.coordinate.x,
                    entry.coordinate.y,
                    source,
                    session.state()
                ),
                Err(SessionError::ClaimFailed) => {
                    "No ids left to assign; waiting for the tracker".to_string()
                }
                Err(e) => format!("Correction rejected: {}", e),
            }
        }
        Command::Flush => match session.mark_ready() {
            Ok(()) => "Request ready".to_string(),
            Err(e) => format!("Cannot flush: {}", e),
        },
        Command::Target { frame, seek } => {
            session.set_target_frame(frame, seek);
            format!("Target frame {}", frame)
        }
        Command::Sync => format!("Synchronized at frame {}", session.pause_at_current()),
        Command::Tick(n) => {
            for _ in 0..n {
                tick(&mut session);
            }
            let frames: Vec<_> = session.playback().handles().iter().map(|h| h.frame()).collect();
            format!("Stream frames: {:?}", frames)
        }
        Command::Pool => {
            let ids: Vec<_> = session.pool().ids().collect();
            let lost: Vec<_> = session.lost_ids().collect();
            format!("Assignable: {:?}  lost: {:?}", ids, lost)
        }
        Command::Refill(ids) => {
            session.refill_pool(ids);
            format!("Assignable: {:?}", session.pool().ids().collect::<Vec<_>>())
        }
        Command::Frame(frame) => match session.store().lookup(frame) {
            Some(record) => record
                .objects()
                .map(|o| {
                    format!(
                        "  id {:>4} cls {} src {} at ({:.1}, {:.1}){}",
                        o.id,
                        o.class_id,
                        o.source,
                        o.coordinate.x,
                        o.coordinate.y,
                        if session.is_lost(o.id) { " lost" } else { "" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            None => format!("No tracks on frame {}", frame),
        },
        Command::Status => {
            let mut status = format!(
                "State: {}  target: {:?}  assignable: {}  frames tracked: {}  cycles: {}",
                session.state(),
                session.target_frame(),
                session.pool().len(),
                session.store().len(),
                session.history().len()
            );
            if session.is_complete() {
                status.push_str("  (review complete)");
            }
            status
        }
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use track_session::{PlaybackSynchronizer, SessionConfig, SessionState};

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "click 1 10 20.5".parse::<Command>().unwrap(),
            Command::Click {
                source: 1,
                point: LocalPoint::new(10.0, 20.5)
            }
        );
        assert_eq!(
            "target 300 seek".parse::<Command>().unwrap(),
            Command::Target {
                frame: 300,
                seek: true
            }
        );
        assert_eq!("tick".parse::<Command>().unwrap(), Command::Tick(1));
        assert_eq!(
            "refill 4 5".parse::<Command>().unwrap(),
            Command::Refill(vec![4, 5])
        );
        assert!(matches!(
            "click 1 x 2".parse::<Command>(),
            Err(CommandError::InvalidNumber(_))
        ));
        assert!(matches!(
            "jump".parse::<Command>(),
            Err(CommandError::Unknown(_))
        ));
    }

    #[test]
    fn test_clicks_until_ready() {
        let playback = PlaybackSynchronizer::new(vec![SimulatedPlayer::at(0)]);
        let mut session =
            CorrectionSession::new(SessionConfig::new().with_initial_ids([1]), playback);
        session.set_target_frame(0, true);
        let shared = Arc::new(Mutex::new(session));
        let display = DisplaySize::new(100.0, 100.0);

        let click = Command::Click {
            source: 0,
            point: LocalPoint::new(50.0, 50.0),
        };
        execute(&shared, click.clone(), display);
        assert_eq!(lock(&shared).state(), SessionState::Ready);

        let out = execute(&shared, click, display);
        assert!(out.starts_with("No ids left"));
    }

    #[test]
    fn test_non_finite_click_is_rejected() {
        let playback = PlaybackSynchronizer::new(vec![SimulatedPlayer::at(0)]);
        let mut session =
            CorrectionSession::new(SessionConfig::new().with_initial_ids([1]), playback);
        session.set_target_frame(0, true);
        let shared = Arc::new(Mutex::new(session));

        let click = "click 0 NaN 5".parse::<Command>().unwrap();
        let out = execute(&shared, click, DisplaySize::new(100.0, 100.0));

        assert!(out.starts_with("Correction rejected"));
        assert_eq!(lock(&shared).pool().ids().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_tick_pauses_at_target() {
        let playback =
            PlaybackSynchronizer::new(vec![SimulatedPlayer::at(0), SimulatedPlayer::at(2)]);
        let session = CorrectionSession::new(SessionConfig::new(), playback);
        let shared = Arc::new(Mutex::new(session));
        let display = DisplaySize::new(100.0, 100.0);

        execute(&shared, Command::Target { frame: 3, seek: false }, display);
        execute(&shared, Command::Tick(6), display);

        let session = lock(&shared);
        assert!(session.playback().is_converged());
        let frames: Vec<_> = session.playback().handles().iter().map(|h| h.frame()).collect();
        assert_eq!(frames, vec![3, 3]);
    }
}
