//! Stagehand - a JACK session orchestrator.
//!
//! Supervises a directory of child audio-client processes, listens to the
//! JACK server's client/port lifecycle callbacks, and applies a declarative
//! patch file to wire ports together as the clients come up.
//!
//! All orchestration state (children, patch, engine command surface) is
//! owned by a single thread. The only data that crosses threads are the
//! fixed-size [`bus::Event`] records published by the signal watcher and
//! the engine callbacks.

pub mod bus;
pub mod children;
pub mod engine;
pub mod names;
pub mod orchestrator;
pub mod patch;
pub mod signals;

mod error;

pub use error::Error;
pub use orchestrator::Orchestrator;
