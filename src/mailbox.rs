//! Request/reply plumbing between callers and a backend thread.
//!
//! The backend thread owns its sound-server objects and serves commands
//! posted to an [`Outbox`]. Each command carries a reply channel. The thread
//! holds an [`AliveGuard`] for as long as it runs, so callers stop waiting
//! as soon as it exits, even when the outbox itself cannot tell that nobody
//! reads it anymore.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::error::{Result, RoutingError};

/// How often a waiting caller rechecks that the thread is still running.
const POLL: Duration = Duration::from_millis(50);

/// Where commands for the backend thread are posted.
pub trait Outbox<C>: Send {
    /// Hand `cmd` over, or give it back if the thread is known to be gone.
    fn post(&self, cmd: C) -> std::result::Result<(), C>;
}

impl<C: Send> Outbox<C> for Sender<C> {
    fn post(&self, cmd: C) -> std::result::Result<(), C> {
        self.send(cmd).map_err(|e| e.0)
    }
}

/// Whether the backend thread is still serving commands.
#[derive(Debug, Clone)]
pub struct Alive(Arc<AtomicBool>);

impl Alive {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Held by the serving thread; clears the flag when dropped, on every
    /// exit path including a panic.
    pub fn guard(&self) -> AliveGuard {
        AliveGuard(self.clone())
    }
}

impl Default for Alive {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AliveGuard(Alive);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.0.store(false, Ordering::Release);
    }
}

pub struct Mailbox<O> {
    outbox: Mutex<O>,
    alive: Alive,
    reply_timeout: Option<Duration>,
}

impl<O> Mailbox<O> {
    /// `reply_timeout` bounds each wait for an answer; `None` waits for as
    /// long as the thread is alive.
    pub fn new(outbox: O, alive: Alive, reply_timeout: Option<Duration>) -> Self {
        Self {
            outbox: Mutex::new(outbox),
            alive,
            reply_timeout,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Post without waiting for an answer. Returns false if the thread is gone.
    pub fn post<C>(&self, cmd: C) -> bool
    where
        O: Outbox<C>,
    {
        self.alive.get() && self.outbox.lock().post(cmd).is_ok()
    }

    /// Post a command built around a fresh reply channel and wait for its
    /// answer.
    pub fn request<C, T>(&self, make: impl FnOnce(Sender<Result<T>>) -> C) -> Result<T>
    where
        O: Outbox<C>,
    {
        if !self.alive.get() {
            return Err(RoutingError::Disconnected);
        }

        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        self.outbox
            .lock()
            .post(make(reply_tx))
            .map_err(|_| RoutingError::Disconnected)?;

        let started = Instant::now();
        loop {
            match reply_rx.recv_timeout(POLL) {
                Ok(answer) => return answer,
                Err(RecvTimeoutError::Disconnected) => return Err(RoutingError::Disconnected),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if !self.alive.get() {
                return Err(RoutingError::Disconnected);
            }
            if let Some(limit) = self.reply_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(RoutingError::Unanswered { waited });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Cmd {
        Echo(u32, Sender<Result<u32>>),
        Ignore(Sender<Result<u32>>),
        Stop,
    }

    /// Accepts every command and never lets go of it, like a channel whose
    /// reader has gone away without closing it.
    struct Hoard(Arc<Mutex<Vec<Cmd>>>);

    impl Outbox<Cmd> for Hoard {
        fn post(&self, cmd: Cmd) -> std::result::Result<(), Cmd> {
            self.0.lock().push(cmd);
            Ok(())
        }
    }

    fn spawn_server(
        alive: &Alive,
    ) -> (Sender<Cmd>, std::thread::JoinHandle<()>, Arc<Mutex<Vec<Cmd>>>) {
        let (tx, rx) = std::sync::mpsc::channel::<Cmd>();
        let guard = alive.guard();
        let kept = Arc::new(Mutex::new(Vec::new()));
        let kept_by_server = kept.clone();
        let handle = std::thread::spawn(move || {
            let _guard = guard;
            for cmd in rx {
                match cmd {
                    Cmd::Echo(v, reply) => {
                        let _ = reply.send(Ok(v));
                    }
                    Cmd::Ignore(reply) => kept_by_server.lock().push(Cmd::Ignore(reply)),
                    Cmd::Stop => break,
                }
            }
        });
        (tx, handle, kept)
    }

    #[test]
    fn test_request_gets_answer() {
        let alive = Alive::new();
        let (tx, handle, _) = spawn_server(&alive);
        let mailbox = Mailbox::new(tx, alive, Some(Duration::from_secs(5)));

        assert_eq!(mailbox.request(|reply| Cmd::Echo(7, reply)).unwrap(), 7);
        assert!(mailbox.post(Cmd::Stop));
        handle.join().unwrap();
    }

    #[test]
    fn test_request_after_thread_exit_is_disconnected() {
        let alive = Alive::new();
        let (tx, handle, _) = spawn_server(&alive);
        let mailbox = Mailbox::new(tx, alive, None);
        assert!(mailbox.post(Cmd::Stop));
        handle.join().unwrap();

        assert!(!mailbox.is_alive());
        assert!(matches!(
            mailbox.request(|reply| Cmd::Echo(1, reply)),
            Err(RoutingError::Disconnected)
        ));
        assert!(!mailbox.post(Cmd::Stop));
    }

    #[test]
    fn test_orphaned_command_does_not_block_after_exit() {
        let alive = Alive::new();
        let guard = alive.guard();
        let hoard = Arc::new(Mutex::new(Vec::new()));
        let mailbox = Arc::new(Mailbox::new(Hoard(hoard.clone()), alive, None));

        let caller = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || mailbox.request(|reply| Cmd::Echo(3, reply)))
        };
        while hoard.lock().is_empty() {
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(guard);

        let answer = caller.join().unwrap();
        assert!(matches!(answer, Err(RoutingError::Disconnected)));
        // The command (and its reply sender) is still parked
        assert_eq!(hoard.lock().len(), 1);
    }

    #[test]
    fn test_unanswered_request_times_out() {
        let alive = Alive::new();
        let (tx, handle, kept) = spawn_server(&alive);
        let mailbox = Mailbox::new(tx, alive, Some(Duration::from_millis(120)));

        let started = Instant::now();
        let answer = mailbox.request(Cmd::Ignore);
        assert!(matches!(answer, Err(RoutingError::Unanswered { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(kept.lock().len(), 1);

        assert!(mailbox.post(Cmd::Stop));
        handle.join().unwrap();
    }
}
