//! Round-trip barrier.
//!
//! The server offers "tell me when everything queued so far is processed"
//! as a fire-and-forget request whose completion arrives as a `done(seq)`
//! event. [`SyncBarrier::sync`] turns that into a blocking call: issue a
//! round trip, then drive the event source until the matching `done` shows
//! up.
//!
//! ## Reentrancy
//! `dispatch` delivers every queued event, so discovery handlers (node and
//! port add/remove/info) run *inside* `sync`. Callers must not hold
//! registry guards across it. Objects bound by those handlers answer with
//! their info only after the current round, so the barrier keeps issuing
//! rounds until one completes without new binds.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, RoutingError};

/// Upper bound for one `dispatch` call so the deadline is re-checked.
const DISPATCH_SLICE: Duration = Duration::from_millis(100);

/// Safety net against a source that keeps binding forever.
const MAX_ROUNDS: usize = 64;

/// An event source that supports round trips.
pub trait RoundTrip {
    /// Queue a round trip and return its sequence number.
    fn request(&mut self) -> Result<i32>;

    /// Process queued events for at most `timeout`.
    fn dispatch(&mut self, timeout: Duration) -> Result<()>;

    /// Called after each completed round. Returns true when objects were
    /// bound during the round and another round trip is needed to collect
    /// their info.
    fn round_completed(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Idle,
    Waiting(i32),
    Done(i32),
}

/// Receives `done` notifications; hand a clone to the server's core
/// listener.
#[derive(Debug, Clone)]
pub struct DoneListener {
    state: Arc<Mutex<Wait>>,
}

impl DoneListener {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Wait::Idle)),
        }
    }

    /// Record a `done(seq)` event. Anything but the awaited sequence is
    /// ignored.
    pub fn notify(&self, seq: i32) {
        let mut state = self.state.lock();
        if *state == Wait::Waiting(seq) {
            *state = Wait::Done(seq);
        }
    }

    fn arm(&self, seq: i32) {
        *self.state.lock() = Wait::Waiting(seq);
    }

    fn is_done(&self, seq: i32) -> bool {
        *self.state.lock() == Wait::Done(seq)
    }

    fn disarm(&self) {
        *self.state.lock() = Wait::Idle;
    }
}

#[derive(Debug)]
pub struct SyncBarrier {
    listener: DoneListener,
    timeout: Option<Duration>,
}

impl SyncBarrier {
    /// `None` waits forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            listener: DoneListener::new(),
            timeout,
        }
    }

    pub fn listener(&self) -> DoneListener {
        self.listener.clone()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Block until the source has processed everything queued before the
    /// call, including info for objects bound meanwhile.
    pub fn sync(&self, source: &mut impl RoundTrip) -> Result<()> {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);

        for round in 0..MAX_ROUNDS {
            let seq = source.request()?;
            self.listener.arm(seq);
            let result = self.wait_for(source, seq, started, deadline);
            self.listener.disarm();
            result?;

            if !source.round_completed() {
                if round > 0 {
                    log::debug!("Sync settled after {} rounds", round + 1);
                }
                return Ok(());
            }
        }

        log::warn!("Sync gave up settling after {} rounds", MAX_ROUNDS);
        Ok(())
    }

    fn wait_for(
        &self,
        source: &mut impl RoundTrip,
        seq: i32,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<()> {
        while !self.listener.is_done(seq) {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::error!("Round trip {} timed out", seq);
                        return Err(RoutingError::SyncTimeout {
                            seq,
                            waited: now - started,
                        });
                    }
                    (deadline - now).min(DISPATCH_SLICE)
                }
                None => DISPATCH_SLICE,
            };
            source.dispatch(slice)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted source: each request queues `noise` unrelated dones, then
    /// its own.
    struct Scripted {
        listener: DoneListener,
        next_seq: i32,
        queue: VecDeque<i32>,
        noise: usize,
        binds_per_round: Vec<bool>,
        dispatched: usize,
        drop_done: bool,
    }

    impl Scripted {
        fn new(listener: DoneListener) -> Self {
            Self {
                listener,
                next_seq: 0,
                queue: VecDeque::new(),
                noise: 0,
                binds_per_round: Vec::new(),
                dispatched: 0,
                drop_done: false,
            }
        }
    }

    impl RoundTrip for Scripted {
        fn request(&mut self) -> Result<i32> {
            self.next_seq += 1;
            for i in 0..self.noise {
                self.queue.push_back(1000 + i as i32);
            }
            if !self.drop_done {
                self.queue.push_back(self.next_seq);
            }
            Ok(self.next_seq)
        }

        fn dispatch(&mut self, _timeout: Duration) -> Result<()> {
            self.dispatched += 1;
            if let Some(seq) = self.queue.pop_front() {
                self.listener.notify(seq);
            }
            Ok(())
        }

        fn round_completed(&mut self) -> bool {
            if self.binds_per_round.is_empty() {
                false
            } else {
                self.binds_per_round.remove(0)
            }
        }
    }

    #[test]
    fn test_sync_waits_for_matching_sequence() {
        let barrier = SyncBarrier::new(Some(Duration::from_secs(5)));
        let mut source = Scripted::new(barrier.listener());
        source.noise = 3;

        barrier.sync(&mut source).unwrap();
        assert_eq!(source.dispatched, 4);
        assert!(source.queue.is_empty());
    }

    #[test]
    fn test_sync_repeats_rounds_while_binding() {
        let barrier = SyncBarrier::new(None);
        let mut source = Scripted::new(barrier.listener());
        source.binds_per_round = vec![true, true, false];

        barrier.sync(&mut source).unwrap();
        assert_eq!(source.next_seq, 3);
    }

    #[test]
    fn test_sync_times_out_without_done() {
        let barrier = SyncBarrier::new(Some(Duration::from_millis(20)));
        let mut source = Scripted::new(barrier.listener());
        source.drop_done = true;

        let err = barrier.sync(&mut source).unwrap_err();
        assert!(matches!(err, RoutingError::SyncTimeout { seq: 1, .. }));
    }

    #[test]
    fn test_stale_done_is_ignored() {
        let barrier = SyncBarrier::new(None);
        let listener = barrier.listener();
        listener.notify(7);
        listener.arm(8);
        listener.notify(7);
        assert!(!listener.is_done(8));
        listener.notify(8);
        assert!(listener.is_done(8));
    }
}
