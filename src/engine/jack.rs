//! JACK implementation of the engine adapter.
//!
//! Connection setup mirrors what the server demands of a session
//! manager: open with an exact name, hook the lifecycle notifications,
//! activate. The notification callbacks run on JACK-owned threads
//! (possibly more than one over the process lifetime) and do nothing
//! but publish a fixed-size bus event and return.

use std::sync::OnceLock;

use jack::PortSpec;

use super::{Engine, MediaKind, PortDirection, PortId, PortProfile};
use crate::bus::{BusHandle, ClientName, Event, Publisher, MAX_CLIENT_NAME_LEN};
use crate::Error;

pub struct JackEngine {
    client: jack::AsyncClient<Notifications, ()>,
    // Boundary ports stay registered for the life of the connection;
    // the handles are kept so ownership is explicit.
    boundary: Vec<BoundaryPort>,
}

enum BoundaryPort {
    AudioIn(jack::Port<jack::AudioIn>),
    AudioOut(jack::Port<jack::AudioOut>),
    MidiIn(jack::Port<jack::MidiIn>),
    MidiOut(jack::Port<jack::MidiOut>),
}

impl JackEngine {
    /// Open the named connection, register the lifecycle callbacks and
    /// activate. Any failure here is fatal: the orchestrator cannot
    /// run without its hooks into the server.
    pub fn connect(client_global_name: &str, bus: &BusHandle) -> Result<Self, Error> {
        let (client, _status) = jack::Client::new(
            client_global_name,
            jack::ClientOptions::NO_START_SERVER | jack::ClientOptions::USE_EXACT_NAME,
        )?;
        log::info!("connected to JACK as client {:?}", client.name());

        let client = client.activate_async(Notifications::new(bus.clone()), ())?;
        Ok(Self {
            client,
            boundary: Vec::new(),
        })
    }

    fn client(&self) -> &jack::Client {
        self.client.as_client()
    }

    /// Deactivate and close the server connection. Callback-side
    /// resources go away with the engine's own shutdown sequence.
    pub fn close(self) {
        drop(self.boundary);
        match self.client.deactivate() {
            Ok(_) => log::info!("disconnected from JACK"),
            Err(e) => log::warn!("JACK deactivate failed: {e}"),
        }
    }
}

impl Engine for JackEngine {
    fn port_name_by_id(&self, id: PortId) -> Option<String> {
        self.client().port_by_id(id).and_then(|p| p.name().ok())
    }

    fn port_exists(&self, port_global: &str) -> bool {
        self.client().port_by_name(port_global).is_some()
    }

    fn port_profile(&self, port_global: &str) -> Result<PortProfile, Error> {
        let port = self
            .client()
            .port_by_name(port_global)
            .ok_or_else(|| Error::UnknownPort(port_global.to_string()))?;

        let port_type = port.port_type()?;
        let media = media_kind(&port_type).ok_or_else(|| Error::UnsupportedPortType {
            port: port_global.to_string(),
            port_type,
        })?;

        let flags = port.flags();
        let direction = match (
            flags.contains(jack::PortFlags::IS_INPUT),
            flags.contains(jack::PortFlags::IS_OUTPUT),
        ) {
            (true, false) => PortDirection::Input,
            (false, true) => PortDirection::Output,
            _ => return Err(Error::AmbiguousDirection(port_global.to_string())),
        };

        Ok(PortProfile { media, direction })
    }

    fn register_port(&mut self, short_name: &str, profile: PortProfile) -> Result<(), Error> {
        let client = self.client();
        let port = match (profile.media, profile.direction) {
            (MediaKind::Audio, PortDirection::Input) => {
                BoundaryPort::AudioIn(client.register_port(short_name, jack::AudioIn::default())?)
            }
            (MediaKind::Audio, PortDirection::Output) => {
                BoundaryPort::AudioOut(client.register_port(short_name, jack::AudioOut::default())?)
            }
            (MediaKind::Midi, PortDirection::Input) => {
                BoundaryPort::MidiIn(client.register_port(short_name, jack::MidiIn::default())?)
            }
            (MediaKind::Midi, PortDirection::Output) => {
                BoundaryPort::MidiOut(client.register_port(short_name, jack::MidiOut::default())?)
            }
        };
        self.boundary.push(port);
        Ok(())
    }

    fn connect(&mut self, src_global: &str, dst_global: &str) -> Result<(), Error> {
        self.client()
            .connect_ports_by_name(src_global, dst_global)
            .map_err(Error::from)
    }
}

/// Map a JACK port type string to a media kind. Anything beyond the
/// default audio and midi types has no profile we can mirror.
fn media_kind(port_type: &str) -> Option<MediaKind> {
    if port_type == jack::AudioIn::default().jack_port_type() {
        Some(MediaKind::Audio)
    } else if port_type == jack::MidiIn::default().jack_port_type() {
        Some(MediaKind::Midi)
    } else {
        None
    }
}

/// Lifecycle notification handler.
///
/// JACK invokes `thread_init` on every thread it creates for this
/// client (two distinct threads have been observed), so the callback
/// context's publisher is created exactly once behind a `OnceLock`
/// rather than per invocation.
struct Notifications {
    bus: BusHandle,
    publisher: OnceLock<Publisher>,
}

impl Notifications {
    fn new(bus: BusHandle) -> Self {
        Self {
            bus,
            publisher: OnceLock::new(),
        }
    }

    fn publisher(&self) -> &Publisher {
        self.publisher
            .get_or_init(|| self.bus.publisher("engine-callback"))
    }
}

impl jack::NotificationHandler for Notifications {
    fn thread_init(&self, _: &jack::Client) {
        let _ = self.publisher();
        log::debug!("engine callback thread initialized");
    }

    fn client_registration(&mut self, _: &jack::Client, name: &str, is_registered: bool) {
        let Ok(name) = ClientName::from(name) else {
            // Name over the fixed event capacity: broken contract, and
            // unwinding must not cross the C callback boundary.
            log::error!(
                "client name exceeds {} bytes: {:?}",
                MAX_CLIENT_NAME_LEN,
                name
            );
            std::process::abort();
        };
        self.publisher().publish(Event::Client {
            name,
            registered: is_registered,
        });
    }

    fn port_registration(&mut self, _: &jack::Client, port_id: jack::PortId, is_registered: bool) {
        self.publisher().publish(Event::Port {
            port_id,
            registered: is_registered,
        });
    }
}
