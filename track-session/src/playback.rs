//! Playback synchronization across several video streams
//!
//! Each stream is reached through a [`PlaybackHandle`]. The synchronizer never
//! ticks a global clock: every handle plays on its own and reports decoded
//! frames through [`PlaybackSynchronizer::on_frame_ready`], which pauses it once
//! it reaches the target frame. Streams converge on the pause point
//! independently and in any interleaving.

use crate::types::{FrameNumber, Result, SessionError};

/// Control surface of a single video stream
pub trait PlaybackHandle {
    /// Current frame of the stream
    fn frame(&self) -> FrameNumber;
    fn is_playing(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, frame: FrameNumber);
}

/// Decision taken for a frame-ready notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameReadyAction {
    Paused,
    Resumed,
    /// The stream index is not registered
    Ignored,
}

pub struct PlaybackSynchronizer<H> {
    handles: Vec<H>,
    target: FrameNumber,
    /// Frame of the last lock-step synchronization
    known_min: FrameNumber,
}

impl<H: PlaybackHandle> PlaybackSynchronizer<H> {
    pub fn new(handles: Vec<H>) -> Self {
        Self {
            handles,
            target: 0,
            known_min: 0,
        }
    }

    pub fn add_handle(&mut self, handle: H) {
        self.handles.push(handle);
    }

    pub fn handles(&self) -> &[H] {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut [H] {
        &mut self.handles
    }

    pub fn target_frame(&self) -> FrameNumber {
        self.target
    }

    pub fn known_min(&self) -> FrameNumber {
        self.known_min
    }

    /// Pause every stream at the slowest stream's frame
    ///
    /// Fails with `SynchronizationUnavailable` when no handles are registered.
    pub fn try_synchronized_frame(&mut self) -> Result<FrameNumber> {
        let lowest = self
            .handles
            .iter()
            .map(|h| h.frame())
            .min()
            .ok_or(SessionError::SynchronizationUnavailable)?;

        for handle in &mut self.handles {
            handle.pause();
            handle.seek(lowest);
        }
        self.known_min = lowest;
        log::info!("Synchronized {} streams to frame {}", self.handles.len(), lowest);

        Ok(lowest)
    }

    /// Like [`try_synchronized_frame`](Self::try_synchronized_frame), but logs
    /// a missing stream set and returns frame 0 without seeking.
    pub fn synchronized_frame(&mut self) -> FrameNumber {
        match self.try_synchronized_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("{}", e);
                0
            }
        }
    }

    /// Drive every stream toward a new pause point
    ///
    /// With `with_seek`, every stream jumps to `target` and plays. Otherwise
    /// streams keep playing forward; only a stream already past `target` is
    /// rewound to the last synchronized frame.
    pub fn set_target_frame(&mut self, target: FrameNumber, with_seek: bool) {
        self.target = target;

        for (index, handle) in self.handles.iter_mut().enumerate() {
            if with_seek {
                handle.seek(target);
            } else if handle.frame() > target {
                log::debug!(
                    "Stream {} overshot target {} at frame {}, rewinding to {}",
                    index,
                    target,
                    handle.frame(),
                    self.known_min
                );
                handle.seek(self.known_min);
            }
            handle.play();
        }
        log::info!("Playback target set to frame {} (seek: {})", target, with_seek);
    }

    /// Handle a decoded-frame notification from one stream
    ///
    /// Pausing an already paused stream leaves it untouched.
    pub fn on_frame_ready(&mut self, stream: usize, frame: FrameNumber) -> FrameReadyAction {
        let target = self.target;
        let Some(handle) = self.handles.get_mut(stream) else {
            log::warn!("Frame-ready from unknown stream {}", stream);
            return FrameReadyAction::Ignored;
        };

        log::trace!("Stream {} decoded frame {} (target {})", stream, frame, target);
        if frame >= target {
            if handle.is_playing() {
                handle.pause();
            }
            FrameReadyAction::Paused
        } else {
            if !handle.is_playing() {
                handle.play();
            }
            FrameReadyAction::Resumed
        }
    }

    /// True when every stream is paused at or past the target frame
    pub fn is_converged(&self) -> bool {
        self.handles
            .iter()
            .all(|h| !h.is_playing() && h.frame() >= self.target)
    }
}

/// In-memory stream used by the host binary and in tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedPlayer {
    frame: FrameNumber,
    playing: bool,
}

impl SimulatedPlayer {
    pub fn at(frame: FrameNumber) -> Self {
        Self {
            frame,
            playing: false,
        }
    }

    /// Decode one frame if playing; returns the new frame number
    pub fn step(&mut self) -> Option<FrameNumber> {
        if self.playing {
            self.frame += 1;
            Some(self.frame)
        } else {
            None
        }
    }
}

impl PlaybackHandle for SimulatedPlayer {
    fn frame(&self) -> FrameNumber {
        self.frame
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, frame: FrameNumber) {
        self.frame = frame;
    }
}
