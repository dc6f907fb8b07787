//! Session configuration types
//!
//! This module defines the configuration needed by the session library. Host
//! concerns (network endpoint, display size, stream count) live in the
//! application layer.

use crate::transform::Resolution;
use crate::types::{FrameNumber, ObjectId};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Configuration for a correction session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reference resolution of the source videos
    #[serde(default)]
    pub resolution: Resolution,

    /// Ids available to the reviewer before the first reply arrives
    #[serde(default)]
    pub initial_ids: Vec<ObjectId>,

    /// Frame the review starts at (default: synchronize the streams)
    #[serde(default)]
    pub start_frame: Option<FrameNumber>,

    /// Review is complete once a reply's `lost_frame_id` reaches this frame
    #[serde(default)]
    pub end_frame: Option<FrameNumber>,
}

impl SessionConfig {
    /// Create a new session configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the reference resolution
    pub fn with_resolution(mut self, width: f32, height: f32) -> Self {
        self.resolution = Resolution { width, height };
        self
    }

    /// Builder method: set the initial id set
    pub fn with_initial_ids(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.initial_ids = ids.into_iter().collect();
        self
    }

    /// Builder method: use every id in a half-open range
    pub fn with_id_range(mut self, ids: Range<ObjectId>) -> Self {
        self.initial_ids = ids.collect();
        self
    }

    /// Builder method: set the start frame
    pub fn with_start_frame(mut self, frame: FrameNumber) -> Self {
        self.start_frame = Some(frame);
        self
    }

    /// Builder method: set the end frame
    pub fn with_end_frame(mut self, frame: FrameNumber) -> Self {
        self.end_frame = Some(frame);
        self
    }
}
