//! Audio engine adapter
//!
//! The orchestrator talks to the audio server through the narrow
//! [`Engine`] trait: port lookup, existence test, profile query,
//! boundary-port registration and connection requests. The JACK
//! implementation lives in [`jack`]; tests substitute a recording mock.
//!
//! Lifecycle callbacks are not part of the trait; they run on threads
//! the server owns and only ever publish bus events.

mod jack;

pub use jack::JackEngine;

use crate::Error;

/// Server-assigned port identifier, as carried in port lifecycle events.
pub type PortId = u32;

/// The media a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Midi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn opposite(self) -> Self {
        match self {
            PortDirection::Input => PortDirection::Output,
            PortDirection::Output => PortDirection::Input,
        }
    }
}

/// What a boundary port must be created as: the media kind of the
/// triggering port, with a direction of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortProfile {
    pub media: MediaKind,
    pub direction: PortDirection,
}

impl PortProfile {
    /// Same media, flipped direction: the profile a boundary port gets
    /// so it can face the triggering port.
    pub fn opposite(self) -> Self {
        Self {
            media: self.media,
            direction: self.direction.opposite(),
        }
    }
}

/// Command surface the orchestrator uses. Only ever called from the
/// orchestrator thread, never from a server callback.
pub trait Engine {
    /// Resolve a port id from a lifecycle event to its global name.
    /// `None` when the port is already gone again.
    fn port_name_by_id(&self, id: PortId) -> Option<String>;

    /// Does a port with this global name exist right now?
    fn port_exists(&self, port_global: &str) -> bool;

    /// Media kind and direction of an existing port. Errors when the
    /// port is gone, its type is not a supported media kind, or its
    /// flags are not exactly one of input/output.
    fn port_profile(&self, port_global: &str) -> Result<PortProfile, Error>;

    /// Register a port on the orchestrator's own client under its local
    /// short name. Failure is fatal to the caller: the patch demanded
    /// this port.
    fn register_port(&mut self, short_name: &str, profile: PortProfile) -> Result<(), Error>;

    /// Ask the server to connect two ports by global name. Failure is
    /// recoverable; the ports may already be connected or one may be
    /// transiently gone.
    fn connect(&mut self, src_global: &str, dst_global: &str) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_opposite_flips_direction_only() {
        let p = PortProfile {
            media: MediaKind::Audio,
            direction: PortDirection::Output,
        };
        assert_eq!(
            p.opposite(),
            PortProfile {
                media: MediaKind::Audio,
                direction: PortDirection::Input,
            }
        );
        assert_eq!(p.opposite().opposite(), p);
    }
}
