//! Core types for the track correction session
//!
//! This module defines the data model shared by every component: identifiers,
//! the three coordinate spaces, the per-frame tracking records and the two wire
//! messages exchanged with the external tracker (`TrackRequest` and
//! `UpdateResult`).
//!
//! Coordinates are split into one type per space (`VideoPoint`,
//! `NormalizedPoint`, `LocalPoint`) so a value can never be passed to a
//! function expecting another space.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type used throughout the session
pub type Timestamp = DateTime<Utc>;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Identity assigned to a tracked object
pub type ObjectId = i32;

/// Video frame index
pub type FrameNumber = i64;

/// Index of the video stream a correction was made on
pub type SourceIndex = i32;

/// Class id given to objects created by a human correction
pub const DEFAULT_CLASS_ID: i32 = 0;

/// Errors that can occur while driving a correction session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The identity pool is exhausted. Expected during normal review.
    #[error("No identity slot available to claim")]
    ClaimFailed,

    #[error("Protocol violation: {operation} is not allowed in state {state}")]
    ProtocolViolation {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Malformed payload: {0}")]
    MalformedRequestPayload(String),

    #[error("No playback handles registered for synchronization")]
    SynchronizationUnavailable,

    #[error("Invalid display size: {width}x{height}")]
    InvalidDisplaySize { width: f32, height: f32 },

    #[error("No target frame has been set")]
    NoTargetFrame,

    #[error("Invalid coordinate: ({x}, {y})")]
    InvalidCoordinate { x: f32, y: f32 },
}

/// Lifecycle state of a correction session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    AwaitingCorrections,
    Ready,
    AwaitingReply,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::AwaitingCorrections => write!(f, "AwaitingCorrections"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::AwaitingReply => write!(f, "AwaitingReply"),
        }
    }
}

/// A point in video-pixel space (reference resolution, origin top-left)
///
/// Serialized as a two-element array `[x, y]`, matching the `c` field of the
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct VideoPoint {
    pub x: f32,
    pub y: f32,
}

impl VideoPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for VideoPoint {
    fn from(c: [f32; 2]) -> Self {
        Self { x: c[0], y: c[1] }
    }
}

impl From<VideoPoint> for [f32; 2] {
    fn from(p: VideoPoint) -> Self {
        [p.x, p.y]
    }
}

/// A point in normalized `[0, 1]` space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

/// A point in a display area's local space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalPoint {
    pub x: f32,
    pub y: f32,
}

impl LocalPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Size of a display area in local units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: f32,
    pub height: f32,
}

impl DisplaySize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Returns an error unless both dimensions are finite and positive
    pub fn validate(&self) -> Result<()> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if valid(self.width) && valid(self.height) {
            Ok(())
        } else {
            Err(SessionError::InvalidDisplaySize {
                width: self.width,
                height: self.height,
            })
        }
    }
}

/// A single human correction
///
/// Wire shape: `{"id": 5, "c": [x, y], "src": 0}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub id: ObjectId,
    /// Video-pixel coordinate of the correction
    #[serde(rename = "c")]
    pub coordinate: VideoPoint,
    #[serde(rename = "src")]
    pub source: SourceIndex,
}

/// A tracked object inside a frame record
///
/// Wire shape: `{"id": 1, "cls_id": 0, "c": [x, y], "src": 0}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackObject {
    pub id: ObjectId,
    #[serde(rename = "cls_id")]
    pub class_id: i32,
    #[serde(rename = "c")]
    pub coordinate: VideoPoint,
    #[serde(rename = "src")]
    pub source: SourceIndex,
}

impl From<TrackEntry> for TrackObject {
    fn from(entry: TrackEntry) -> Self {
        Self {
            id: entry.id,
            class_id: DEFAULT_CLASS_ID,
            coordinate: entry.coordinate,
            source: entry.source,
        }
    }
}

/// All known object positions for one frame, indexed by object id
///
/// Wire shape: `{"fr": 10, "obj": [TrackObject, ...]}`. On decode, a repeated
/// id keeps the last occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FrameTrackingData", into = "FrameTrackingData")]
pub struct FrameTrackRecord {
    pub frame: FrameNumber,
    objects: BTreeMap<ObjectId, TrackObject>,
}

impl FrameTrackRecord {
    /// Create an empty record for a frame
    pub fn new(frame: FrameNumber) -> Self {
        Self {
            frame,
            objects: BTreeMap::new(),
        }
    }

    /// Build a record from a list of objects (later duplicates win)
    pub fn with_objects(
        frame: FrameNumber,
        objects: impl IntoIterator<Item = TrackObject>,
    ) -> Self {
        let mut record = Self::new(frame);
        for object in objects {
            if record.objects.insert(object.id, object).is_some() {
                log::warn!("Frame {} lists object {} more than once", frame, object.id);
            }
        }
        record
    }

    pub fn get(&self, id: ObjectId) -> Option<&TrackObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut TrackObject> {
        self.objects.get_mut(&id)
    }

    pub fn insert(&mut self, object: TrackObject) {
        self.objects.insert(object.id, object);
    }

    /// Objects in ascending id order
    pub fn objects(&self) -> impl Iterator<Item = &TrackObject> {
        self.objects.values()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Wire form of a `FrameTrackRecord`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameTrackingData {
    fr: FrameNumber,
    #[serde(default)]
    obj: Vec<TrackObject>,
}

impl From<FrameTrackingData> for FrameTrackRecord {
    fn from(data: FrameTrackingData) -> Self {
        FrameTrackRecord::with_objects(data.fr, data.obj)
    }
}

impl From<FrameTrackRecord> for FrameTrackingData {
    fn from(record: FrameTrackRecord) -> Self {
        FrameTrackingData {
            fr: record.frame,
            obj: record.objects.into_values().collect(),
        }
    }
}

/// Request handed to the external tracker
///
/// Wire shape: `{"frame_id": 7200, "coords": [TrackEntry, ...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    #[serde(rename = "frame_id")]
    pub frame: FrameNumber,
    #[serde(rename = "coords")]
    pub entries: Vec<TrackEntry>,
}

/// Reply pushed back by the external tracker
///
/// Wire shape: `{"lost_frame_id": 7300, "tracks": [...], "lost_ids": [3, 4]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateResult {
    #[serde(rename = "lost_frame_id")]
    pub lost_frame: FrameNumber,
    #[serde(default)]
    pub tracks: Vec<FrameTrackRecord>,
    #[serde(default)]
    pub lost_ids: Vec<ObjectId>,
}

impl UpdateResult {
    /// Decode a reply from a JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| SessionError::MalformedRequestPayload(e.to_string()))
    }

    /// Decode a reply from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| SessionError::MalformedRequestPayload(e.to_string()))
    }
}

/// Summary of one completed request/reply cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    /// Frame the request was built for
    pub request_frame: FrameNumber,
    /// Number of entries in the request
    pub entries: usize,
    /// `lost_frame_id` of the reply
    pub lost_frame: FrameNumber,
    /// Number of ids reported lost
    pub lost_ids: usize,
    pub requested_at: Timestamp,
    pub received_at: Timestamp,
}
