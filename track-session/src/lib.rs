//! Track Correction Session Library
//!
//! The protocol core of an interactive correction tool for multi-object video
//! tracking. A reviewer watches several synchronized video streams, clicks on
//! mis-tracked or lost objects to relabel them, and the relabeled coordinates
//! are exchanged with an external tracker that returns corrected per-frame
//! tracks and a new set of lost ids.
//!
//! # Architecture
//!
//! - [`CoordinateTransform`] maps between video-pixel, normalized and local
//!   display space
//! - [`IdentityPool`] hands out assignable object ids in FIFO order
//! - [`FrameTrackStore`] holds per-frame object positions, indexed by frame
//!   and id
//! - [`CorrectionSession`] is the state machine tying them together; it keeps
//!   at most one request outstanding
//! - [`PlaybackSynchronizer`] drives N streams toward a common pause point
//! - [`RpcBoundary`] exposes `isReady` / `getRequest` / `onReceive` to the
//!   tracker over JSON-RPC 2.0
//!
//! The library does NOT decode video, render overlays or run the tracker.
//!
//! # Example Usage
//!
//! ```
//! use track_session::{
//!     CorrectionSession, DisplaySize, LocalPoint, PlaybackSynchronizer, SessionConfig,
//!     SimulatedPlayer, UpdateResult,
//! };
//!
//! let playback = PlaybackSynchronizer::new(vec![SimulatedPlayer::at(0)]);
//! let config = SessionConfig::new().with_initial_ids([1, 2]);
//! let mut session = CorrectionSession::new(config, playback);
//! session.set_target_frame(7200, true);
//!
//! let display = DisplaySize::new(640.0, 360.0);
//! session.record_correction(LocalPoint::new(320.0, 180.0), 0, display).unwrap();
//! session.record_correction(LocalPoint::new(100.0, 50.0), 1, display).unwrap();
//! assert!(session.is_ready());
//!
//! let request = session.take_request().unwrap();
//! assert_eq!(request.entries.len(), 2);
//!
//! session
//!     .apply_result(UpdateResult { lost_frame: 7300, tracks: vec![], lost_ids: vec![3] })
//!     .unwrap();
//! assert_eq!(session.target_frame(), Some(7300));
//! ```

// Public modules
pub mod config;
pub mod identity;
pub mod playback;
pub mod rpc;
pub mod session;
pub mod store;
pub mod transform;
pub mod types;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use identity::IdentityPool;
pub use playback::{FrameReadyAction, PlaybackHandle, PlaybackSynchronizer, SimulatedPlayer};
pub use rpc::{RpcBoundary, RpcError, RpcResponse, SharedSession};
pub use session::{CorrectionSession, SessionEvent};
pub use store::{FrameTrackStore, UpsertOutcome};
pub use transform::{CoordinateTransform, LocalRect, PixelBox, Resolution};
pub use types::{
    CycleRecord, DisplaySize, FrameNumber, FrameTrackRecord, LocalPoint, NormalizedPoint,
    ObjectId, Result, SessionError, SessionState, SourceIndex, Timestamp, TrackEntry,
    TrackObject, TrackRequest, UpdateResult, VideoPoint, DEFAULT_CLASS_ID,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
