//! Correction session state machine
//!
//! The session owns the identity pool, the frame tracking store and the
//! playback synchronizer. It turns reviewer clicks into tracked entries,
//! decides when a request is ready, hands it out exactly once and merges the
//! tracker's reply.
//!
//! ```text
//! Idle ──(target set, pool non-empty)──> AwaitingCorrections
//! AwaitingCorrections ──(pool exhausted | mark_ready)──> Ready
//! Ready ──(take_request)──> AwaitingReply
//! AwaitingReply ──(apply_result)──> AwaitingCorrections
//! ```
//!
//! At most one request is outstanding at any time. Corrections recorded after
//! a request was built are held back and re-applied once the reply has replaced
//! the store, so they land in the next request instead of the current one.

use crate::config::SessionConfig;
use crate::identity::IdentityPool;
use crate::playback::{PlaybackHandle, PlaybackSynchronizer};
use crate::store::FrameTrackStore;
use crate::transform::CoordinateTransform;
use crate::types::{
    CycleRecord, DisplaySize, FrameNumber, LocalPoint, ObjectId, Result, SessionError,
    SessionState, SourceIndex, Timestamp, TrackEntry, TrackRequest, UpdateResult,
};
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};

/// Change notifications for the display collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Frames whose records changed; empty after a full replacement
    StoreChanged { frames: Vec<FrameNumber> },
    PoolChanged,
    TargetAdvanced(FrameNumber),
}

/// Request handed out and not yet answered
#[derive(Debug, Clone)]
struct InFlight {
    frame: FrameNumber,
    entries: usize,
    requested_at: Timestamp,
}

pub struct CorrectionSession<H> {
    state: SessionState,
    pool: IdentityPool,
    store: FrameTrackStore,
    playback: PlaybackSynchronizer<H>,
    transform: CoordinateTransform,
    target: Option<FrameNumber>,
    start_frame: Option<FrameNumber>,
    end_frame: Option<FrameNumber>,
    /// Request built on entering `Ready`
    pending: Option<TrackRequest>,
    in_flight: Option<InFlight>,
    /// Corrections recorded after the current request was built
    deferred: Vec<(FrameNumber, TrackEntry)>,
    lost: BTreeSet<ObjectId>,
    last_lost_frame: Option<FrameNumber>,
    history: Vec<CycleRecord>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl<H: PlaybackHandle> CorrectionSession<H> {
    /// Create a session in `Idle` with the configured initial ids
    pub fn new(config: SessionConfig, playback: PlaybackSynchronizer<H>) -> Self {
        let mut pool = IdentityPool::new();
        pool.refill(config.initial_ids.iter().copied());

        Self {
            state: SessionState::Idle,
            pool,
            store: FrameTrackStore::new(),
            playback,
            transform: CoordinateTransform::new(config.resolution),
            target: None,
            start_frame: config.start_frame,
            end_frame: config.end_frame,
            pending: None,
            in_flight: None,
            deferred: Vec::new(),
            lost: BTreeSet::new(),
            last_lost_frame: None,
            history: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Pick the first target frame: the configured start frame if any,
    /// otherwise the synchronized position of the streams.
    pub fn start(&mut self) -> FrameNumber {
        match self.start_frame {
            Some(frame) => {
                self.set_target_frame(frame, true);
                frame
            }
            None => self.pause_at_current(),
        }
    }

    /// Receive every subsequent event, in order
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn target_frame(&self) -> Option<FrameNumber> {
        self.target
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    pub fn store(&self) -> &FrameTrackStore {
        &self.store
    }

    pub fn transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    pub fn playback(&self) -> &PlaybackSynchronizer<H> {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackSynchronizer<H> {
        &mut self.playback
    }

    /// Ids the latest reply reported lost
    pub fn lost_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.lost.iter().copied()
    }

    pub fn is_lost(&self, id: ObjectId) -> bool {
        self.lost.contains(&id)
    }

    pub fn history(&self) -> &[CycleRecord] {
        &self.history
    }

    /// True once a reply's `lost_frame_id` has reached the configured end frame
    pub fn is_complete(&self) -> bool {
        match (self.end_frame, self.last_lost_frame) {
            (Some(end), Some(lost)) => lost >= end,
            _ => false,
        }
    }

    /// Synchronize all streams and use their common frame as the target
    pub fn pause_at_current(&mut self) -> FrameNumber {
        let frame = self.playback.synchronized_frame();
        self.target = Some(frame);
        self.emit(SessionEvent::TargetAdvanced(frame));
        self.leave_idle();
        frame
    }

    /// Move the target frame and drive playback toward it
    pub fn set_target_frame(&mut self, frame: FrameNumber, with_seek: bool) {
        self.target = Some(frame);
        self.playback.set_target_frame(frame, with_seek);
        self.emit(SessionEvent::TargetAdvanced(frame));
        self.leave_idle();
    }

    /// Replace the assignable ids (identity-display collaborator)
    pub fn refill_pool(&mut self, ids: impl IntoIterator<Item = ObjectId>) {
        self.pool.refill(ids);
        self.emit(SessionEvent::PoolChanged);
        self.leave_idle();
    }

    /// Record a reviewer click on stream `source`
    ///
    /// Claims the next id and places it at the clicked position on the target
    /// frame. Exhausting the pool makes the session ready. Fails with
    /// `ClaimFailed` when no id is left.
    pub fn record_correction(
        &mut self,
        point: LocalPoint,
        source: SourceIndex,
        display: DisplaySize,
    ) -> Result<TrackEntry> {
        let coordinate = self.transform.to_video(point, display)?;
        let frame = self.target.ok_or(SessionError::NoTargetFrame)?;
        let id = self.pool.claim_next().ok_or(SessionError::ClaimFailed)?;

        let entry = TrackEntry {
            id,
            coordinate,
            source,
        };
        self.store.upsert(frame, entry);
        log::debug!(
            "Correction on stream {}: id {} at {:?} (frame {})",
            source,
            id,
            coordinate,
            frame
        );
        self.emit(SessionEvent::PoolChanged);
        self.emit(SessionEvent::StoreChanged {
            frames: vec![frame],
        });

        match self.state {
            SessionState::Ready | SessionState::AwaitingReply => {
                log::debug!("Request already built; holding id {} for the next cycle", id);
                self.deferred.push((frame, entry));
            }
            _ => {
                if self.pool.is_empty() {
                    self.enter_ready(frame);
                }
            }
        }

        Ok(entry)
    }

    /// Force readiness with whatever the target frame holds
    pub fn mark_ready(&mut self) -> Result<()> {
        if self.state == SessionState::AwaitingReply {
            return Err(self.violation("mark_ready"));
        }
        let frame = self.target.ok_or(SessionError::NoTargetFrame)?;
        if self.state == SessionState::Ready {
            log::debug!("Rebuilding ready request for frame {}", frame);
        }
        self.enter_ready(frame);
        Ok(())
    }

    /// Hand the ready request to the tracker
    ///
    /// Valid only in `Ready`; a second call before the reply is a protocol
    /// violation and leaves the state unchanged.
    pub fn take_request(&mut self) -> Result<TrackRequest> {
        if self.state != SessionState::Ready {
            return Err(self.violation("take_request"));
        }
        let request = self.pending.take().ok_or_else(|| self.violation("take_request"))?;

        self.in_flight = Some(InFlight {
            frame: request.frame,
            entries: request.entries.len(),
            requested_at: Utc::now(),
        });
        log::info!(
            "Request for frame {} retrieved ({} entries)",
            request.frame,
            request.entries.len()
        );
        self.set_state(SessionState::AwaitingReply);
        Ok(request)
    }

    /// Install the tracker's reply
    ///
    /// Replaces the store, refills the pool with the lost ids, replaces the
    /// lost classification and advances playback to `lost_frame_id`.
    pub fn apply_result(&mut self, result: UpdateResult) -> Result<()> {
        match self.state {
            SessionState::AwaitingReply => {}
            SessionState::Ready => {
                log::warn!(
                    "Reply for frame {} arrived before the request was retrieved; \
                     discarding the ready request",
                    result.lost_frame
                );
                self.pending = None;
            }
            _ => return Err(self.violation("apply_result")),
        }

        // Held corrections move onto the new target frame.
        let next_frame = result.lost_frame;
        self.store.replace_all(result.tracks);
        let deferred = std::mem::take(&mut self.deferred);
        let held: HashSet<ObjectId> = deferred.iter().map(|(_, e)| e.id).collect();
        for (_, entry) in &deferred {
            self.store.upsert(next_frame, *entry);
        }
        self.emit(SessionEvent::StoreChanged { frames: Vec::new() });

        self.lost = result.lost_ids.iter().copied().collect();
        self.pool
            .refill(result.lost_ids.iter().copied().filter(|id| !held.contains(id)));
        self.emit(SessionEvent::PoolChanged);

        let now = Utc::now();
        let in_flight = self.in_flight.take();
        self.history.push(CycleRecord {
            request_frame: in_flight.as_ref().map_or(result.lost_frame, |f| f.frame),
            entries: in_flight.as_ref().map_or(0, |f| f.entries),
            lost_frame: result.lost_frame,
            lost_ids: result.lost_ids.len(),
            requested_at: in_flight.map_or(now, |f| f.requested_at),
            received_at: now,
        });
        self.last_lost_frame = Some(result.lost_frame);
        log::info!(
            "Reply installed: advancing to frame {}, {} ids lost",
            result.lost_frame,
            result.lost_ids.len()
        );

        self.target = Some(next_frame);
        self.playback.set_target_frame(next_frame, false);
        self.emit(SessionEvent::TargetAdvanced(next_frame));

        if !self.pool.is_empty() {
            self.set_state(SessionState::AwaitingCorrections);
        } else if !deferred.is_empty() {
            self.enter_ready(next_frame);
        } else {
            log::info!("No ids left to assign after frame {}", result.lost_frame);
            self.set_state(SessionState::Idle);
        }
        Ok(())
    }

    /// Snapshot the frame's objects in id order and become ready
    ///
    /// Held corrections on that frame are part of the snapshot and stop being
    /// held.
    fn enter_ready(&mut self, frame: FrameNumber) {
        self.deferred.retain(|(held_frame, _)| *held_frame != frame);

        let entries = self
            .store
            .lookup(frame)
            .map(|record| {
                record
                    .objects()
                    .map(|o| TrackEntry {
                        id: o.id,
                        coordinate: o.coordinate,
                        source: o.source,
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.pending = Some(TrackRequest { frame, entries });
        self.set_state(SessionState::Ready);
    }

    fn leave_idle(&mut self) {
        if self.state == SessionState::Idle && self.target.is_some() && !self.pool.is_empty() {
            self.set_state(SessionState::AwaitingCorrections);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::info!("Session state: {} -> {}", self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn violation(&self, operation: &'static str) -> SessionError {
        SessionError::ProtocolViolation {
            operation,
            state: self.state,
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::SimulatedPlayer;
    use crate::types::{FrameTrackRecord, TrackObject, VideoPoint};

    const DISPLAY: DisplaySize = DisplaySize {
        width: 1920.0,
        height: 1080.0,
    };

    fn session(ids: &[ObjectId]) -> CorrectionSession<SimulatedPlayer> {
        let playback =
            PlaybackSynchronizer::new(vec![SimulatedPlayer::at(0), SimulatedPlayer::at(0)]);
        CorrectionSession::new(SessionConfig::new().with_initial_ids(ids.to_vec()), playback)
    }

    /// Local point for a video pixel on a display of the reference size
    fn click(x: f32, y: f32) -> LocalPoint {
        LocalPoint::new(x, 1080.0 - y)
    }

    #[test]
    fn test_starts_idle_until_target_set() {
        let mut s = session(&[1]);
        assert_eq!(s.state(), SessionState::Idle);
        s.set_target_frame(10, true);
        assert_eq!(s.state(), SessionState::AwaitingCorrections);
    }

    #[test]
    fn test_fifo_identity_claim() {
        let mut s = session(&[]);
        s.set_target_frame(10, true);
        s.refill_pool([5, 6, 7]);

        let ids: Vec<_> = (0..3)
            .map(|i| s.record_correction(click(i as f32, 0.0), 0, DISPLAY).unwrap().id)
            .collect();

        assert_eq!(ids, vec![5, 6, 7]);
        assert!(s.pool().is_empty());
        assert!(s.is_ready());
    }

    #[test]
    fn test_claim_failed_when_exhausted() {
        let mut s = session(&[1]);
        s.set_target_frame(0, true);
        s.record_correction(click(1.0, 1.0), 0, DISPLAY).unwrap();

        let result = s.record_correction(click(2.0, 2.0), 0, DISPLAY);
        assert_eq!(result, Err(SessionError::ClaimFailed));
    }

    #[test]
    fn test_correction_requires_target() {
        let mut s = session(&[1]);
        let result = s.record_correction(click(1.0, 1.0), 0, DISPLAY);
        assert_eq!(result, Err(SessionError::NoTargetFrame));
        assert_eq!(s.pool().len(), 1);
    }

    #[test]
    fn test_single_outstanding_request() {
        let mut s = session(&[1]);
        s.set_target_frame(3, true);
        s.record_correction(click(5.0, 5.0), 1, DISPLAY).unwrap();

        assert!(s.take_request().is_ok());
        let second = s.take_request();
        assert!(matches!(
            second,
            Err(SessionError::ProtocolViolation {
                state: SessionState::AwaitingReply,
                ..
            })
        ));
        assert_eq!(s.state(), SessionState::AwaitingReply);
    }

    #[test]
    fn test_take_request_outside_ready() {
        let mut s = session(&[1, 2]);
        s.set_target_frame(3, true);
        assert!(matches!(
            s.take_request(),
            Err(SessionError::ProtocolViolation { .. })
        ));
        assert_eq!(s.state(), SessionState::AwaitingCorrections);
    }

    #[test]
    fn test_mark_ready_snapshots_target_frame_in_id_order() {
        let mut s = session(&[9, 4, 6]);
        s.set_target_frame(20, true);
        s.record_correction(click(1.0, 1.0), 0, DISPLAY).unwrap();
        s.record_correction(click(2.0, 2.0), 1, DISPLAY).unwrap();
        s.mark_ready().unwrap();

        let request = s.take_request().unwrap();
        assert_eq!(request.frame, 20);
        let ids: Vec<_> = request.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![4, 9]);
    }

    #[test]
    fn test_mark_ready_rejected_while_awaiting_reply() {
        let mut s = session(&[1]);
        s.set_target_frame(3, true);
        s.mark_ready().unwrap();
        s.take_request().unwrap();

        assert!(s.mark_ready().is_err());
        assert_eq!(s.state(), SessionState::AwaitingReply);
    }

    #[test]
    fn test_apply_result_outside_protocol() {
        let mut s = session(&[1]);
        s.set_target_frame(3, true);
        let reply = UpdateResult {
            lost_frame: 10,
            tracks: vec![],
            lost_ids: vec![],
        };
        assert!(matches!(
            s.apply_result(reply),
            Err(SessionError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_apply_result_tolerated_from_ready() {
        let mut s = session(&[1]);
        s.set_target_frame(3, true);
        s.record_correction(click(1.0, 1.0), 0, DISPLAY).unwrap();
        assert!(s.is_ready());

        s.apply_result(UpdateResult {
            lost_frame: 50,
            tracks: vec![],
            lost_ids: vec![2],
        })
        .unwrap();

        assert_eq!(s.state(), SessionState::AwaitingCorrections);
        assert!(s.take_request().is_err());
    }

    #[test]
    fn test_lost_ids_replace_classification() {
        let mut s = session(&[1]);
        s.set_target_frame(0, true);
        s.mark_ready().unwrap();
        s.take_request().unwrap();
        s.apply_result(UpdateResult {
            lost_frame: 10,
            tracks: vec![],
            lost_ids: vec![3, 4],
        })
        .unwrap();
        assert!(s.is_lost(3));

        s.mark_ready().unwrap();
        s.take_request().unwrap();
        s.apply_result(UpdateResult {
            lost_frame: 20,
            tracks: vec![],
            lost_ids: vec![5],
        })
        .unwrap();

        assert_eq!(s.lost_ids().collect::<Vec<_>>(), vec![5]);
        assert!(!s.is_lost(3));
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn test_corrections_during_reply_wait_go_to_next_cycle() {
        let mut s = session(&[1, 2]);
        s.set_target_frame(100, true);
        s.record_correction(click(10.0, 10.0), 0, DISPLAY).unwrap();
        s.mark_ready().unwrap();
        let request = s.take_request().unwrap();

        let late = s.record_correction(click(20.0, 20.0), 1, DISPLAY).unwrap();
        assert_eq!(late.id, 2);
        assert_eq!(request.entries.len(), 1);

        s.apply_result(UpdateResult {
            lost_frame: 200,
            tracks: vec![FrameTrackRecord::with_objects(
                100,
                [TrackObject {
                    id: 1,
                    class_id: 0,
                    coordinate: VideoPoint::new(11.0, 11.0),
                    source: 0,
                }],
            )],
            lost_ids: vec![2, 3],
        })
        .unwrap();

        assert!(s.store().lookup(100).unwrap().contains(1));
        assert!(!s.store().lookup(100).unwrap().contains(2));
        assert!(s.store().lookup(200).unwrap().contains(2));
        assert_eq!(s.pool().ids().collect::<Vec<_>>(), vec![3]);
        assert_eq!(s.state(), SessionState::AwaitingCorrections);

        let last = s.record_correction(click(30.0, 30.0), 0, DISPLAY).unwrap();
        assert_eq!(last.id, 3);
        assert_eq!(s.state(), SessionState::Ready);

        let next = s.take_request().unwrap();
        assert_eq!(next.frame, 200);
        assert_eq!(next.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_non_finite_click_keeps_id() {
        let mut s = session(&[1]);
        s.set_target_frame(10, true);

        let result = s.record_correction(LocalPoint::new(f32::NAN, 5.0), 0, DISPLAY);
        assert!(matches!(result, Err(SessionError::InvalidCoordinate { .. })));
        assert_eq!(s.pool().ids().collect::<Vec<_>>(), vec![1]);
        assert!(s.store().lookup(10).is_none());
        assert_eq!(s.state(), SessionState::AwaitingCorrections);
    }

    #[test]
    fn test_held_correction_alone_becomes_next_request() {
        let mut s = session(&[1, 2]);
        s.set_target_frame(100, true);
        s.record_correction(click(10.0, 10.0), 0, DISPLAY).unwrap();
        s.mark_ready().unwrap();
        s.take_request().unwrap();
        s.record_correction(click(20.0, 20.0), 1, DISPLAY).unwrap();

        s.apply_result(UpdateResult {
            lost_frame: 200,
            tracks: Vec::new(),
            lost_ids: vec![2],
        })
        .unwrap();

        assert_eq!(s.state(), SessionState::Ready);
        assert!(s.pool().is_empty());
        let next = s.take_request().unwrap();
        assert_eq!(next.frame, 200);
        assert_eq!(next.entries.len(), 1);
        assert_eq!(next.entries[0].id, 2);
        assert_eq!(next.entries[0].source, 1);
    }

    #[test]
    fn test_rebuilt_snapshot_releases_held_ids() {
        let mut s = session(&[1, 2, 3]);
        s.set_target_frame(10, true);
        s.record_correction(click(10.0, 10.0), 0, DISPLAY).unwrap();
        s.mark_ready().unwrap();
        s.record_correction(click(20.0, 20.0), 0, DISPLAY).unwrap();
        s.mark_ready().unwrap();

        let request = s.take_request().unwrap();
        assert_eq!(request.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

        s.apply_result(UpdateResult {
            lost_frame: 20,
            tracks: Vec::new(),
            lost_ids: vec![2, 4],
        })
        .unwrap();

        assert_eq!(s.pool().ids().collect::<Vec<_>>(), vec![2, 4]);
        assert_eq!(s.state(), SessionState::AwaitingCorrections);
        assert!(s.store().lookup(20).is_none());
    }

    #[test]
    fn test_empty_reply_leaves_session_idle() {
        let mut s = session(&[1]);
        s.set_target_frame(0, true);
        s.mark_ready().unwrap();
        s.take_request().unwrap();
        s.apply_result(UpdateResult {
            lost_frame: 30,
            tracks: vec![],
            lost_ids: vec![],
        })
        .unwrap();

        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.target_frame(), Some(30));

        s.refill_pool([8]);
        assert_eq!(s.state(), SessionState::AwaitingCorrections);
    }

    #[test]
    fn test_completion_at_end_frame() {
        let playback = PlaybackSynchronizer::new(vec![SimulatedPlayer::at(0)]);
        let config = SessionConfig::new().with_initial_ids([1]).with_end_frame(100);
        let mut s = CorrectionSession::new(config, playback);
        s.set_target_frame(0, true);
        s.mark_ready().unwrap();
        s.take_request().unwrap();
        assert!(!s.is_complete());

        s.apply_result(UpdateResult {
            lost_frame: 100,
            tracks: vec![],
            lost_ids: vec![1],
        })
        .unwrap();
        assert!(s.is_complete());
    }

    #[test]
    fn test_start_uses_synchronized_frame() {
        let playback =
            PlaybackSynchronizer::new(vec![SimulatedPlayer::at(42), SimulatedPlayer::at(17)]);
        let mut s = CorrectionSession::new(SessionConfig::new().with_initial_ids([1]), playback);

        assert_eq!(s.start(), 17);
        assert_eq!(s.target_frame(), Some(17));
        assert_eq!(s.state(), SessionState::AwaitingCorrections);
    }

    #[test]
    fn test_events_in_order() {
        let mut s = session(&[1]);
        let events = s.subscribe();
        s.set_target_frame(5, true);
        s.record_correction(click(1.0, 1.0), 0, DISPLAY).unwrap();

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                SessionEvent::TargetAdvanced(5),
                SessionEvent::StateChanged(SessionState::AwaitingCorrections),
                SessionEvent::PoolChanged,
                SessionEvent::StoreChanged { frames: vec![5] },
                SessionEvent::StateChanged(SessionState::Ready),
            ]
        );
    }
}
