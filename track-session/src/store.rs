//! Frame tracking store
//!
//! Per-frame object positions keyed by frame number, then by object id.
//! `upsert` merges a single correction into a frame; `replace_all` installs a
//! full tracker reply.

use crate::types::{FrameNumber, FrameTrackRecord, TrackEntry, TrackObject};
use std::collections::HashMap;

/// What an `upsert` did to the frame record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The id was new to the frame and was appended
    Inserted,
    /// The id existed; only its coordinate changed
    Updated,
}

#[derive(Debug, Clone, Default)]
pub struct FrameTrackStore {
    records: HashMap<FrameNumber, FrameTrackRecord>,
}

impl FrameTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a correction into a frame
    ///
    /// A new id is appended with the default class id. An existing id keeps its
    /// class id and source; only the coordinate is replaced. Other ids in the
    /// frame are never touched.
    pub fn upsert(&mut self, frame: FrameNumber, entry: TrackEntry) -> UpsertOutcome {
        let record = self
            .records
            .entry(frame)
            .or_insert_with(|| FrameTrackRecord::new(frame));

        match record.get_mut(entry.id) {
            Some(existing) => {
                existing.coordinate = entry.coordinate;
                log::debug!("Frame {}: moved object {} to {:?}", frame, entry.id, entry.coordinate);
                UpsertOutcome::Updated
            }
            None => {
                record.insert(TrackObject::from(entry));
                log::debug!("Frame {}: added object {} at {:?}", frame, entry.id, entry.coordinate);
                UpsertOutcome::Inserted
            }
        }
    }

    pub fn lookup(&self, frame: FrameNumber) -> Option<&FrameTrackRecord> {
        self.records.get(&frame)
    }

    /// Replace the whole store; a frame listed twice keeps the last record
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = FrameTrackRecord>) {
        self.records.clear();
        for record in records {
            if let Some(previous) = self.records.insert(record.frame, record) {
                log::warn!("Reply lists frame {} more than once; keeping the last", previous.frame);
            }
        }
        log::debug!("Tracking store replaced: {} frames", self.records.len());
    }

    /// Known frames in ascending order
    pub fn frames(&self) -> Vec<FrameNumber> {
        let mut frames: Vec<_> = self.records.keys().copied().collect();
        frames.sort_unstable();
        frames
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
