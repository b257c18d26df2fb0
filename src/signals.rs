//! Signal watcher
//!
//! Converts asynchronous signal delivery into ordinary bus events. A
//! dedicated thread blocks in signal-hook's iterator (the handlers are
//! installed once, process-wide, before any child or engine thread
//! exists) and republishes each delivery as an [`Event::Signal`] with
//! the originating pid, which is how SIGCHLD gets matched back to a
//! supervised child. After publishing a termination-class signal the
//! thread leaves its loop, so the main thread can join it once that
//! event has been consumed.

use std::thread::JoinHandle;

use signal_hook::consts::{SIGCHLD, SIGINT, SIGTERM};
use signal_hook::iterator::exfiltrator::WithOrigin;
use signal_hook::iterator::SignalsInfo;

use crate::bus::{BusHandle, Event};
use crate::Error;

/// Signals the watcher subscribes to.
const WATCHED: [i32; 3] = [SIGCHLD, SIGINT, SIGTERM];

/// True for the signals that request a graceful shutdown.
pub fn is_termination(signal: i32) -> bool {
    signal == SIGINT || signal == SIGTERM
}

pub struct SignalWatcher {
    thread: JoinHandle<()>,
}

impl SignalWatcher {
    /// Install the handlers and start the watcher thread.
    ///
    /// Must run before children are spawned (SIGCHLD) and before the
    /// engine creates its callback threads. Installation failure is
    /// fatal: without signal delivery there is no shutdown path.
    pub fn spawn(handle: &BusHandle) -> Result<Self, Error> {
        let mut signals = SignalsInfo::<WithOrigin>::new(WATCHED).map_err(Error::Signals)?;
        let publisher = handle.publisher("signal-watcher");

        let thread = std::thread::Builder::new()
            .name("signal-watcher".into())
            .spawn(move || {
                for origin in signals.forever() {
                    let sender_pid = origin.process.map(|p| p.pid).unwrap_or(0);
                    log::debug!("signal {} from pid {}", origin.signal, sender_pid);
                    publisher.publish(Event::Signal {
                        signal: origin.signal,
                        sender_pid,
                    });
                    if is_termination(origin.signal) {
                        break;
                    }
                }
            })
            .map_err(Error::Signals)?;

        Ok(Self { thread })
    }

    /// Wait for the watcher thread to finish.
    ///
    /// Only valid after a termination-class signal event has been
    /// observed and processed; that is the watcher's exit condition.
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::warn!("signal watcher thread panicked");
        }
    }
}
