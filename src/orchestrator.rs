//! Orchestrator dispatch loop
//!
//! The single-threaded reactor that owns every other component. It runs
//! three phases: starting (discover and launch children, before any
//! event is consumed), running (blocked in the event bus, dispatching
//! by tag) and stopping (termination observed: stop children, forget
//! them, return). Nothing else ever touches the children, the patch or
//! the engine command surface, so none of that state needs a lock.
//!
//! ## Auto-wiring
//! When a direct child registers a port, the patch is queried from both
//! ends: destinations of this port first, then sources into it, each in
//! rule-insertion order. An endpoint with the leading `:` marker names
//! a port on the orchestrator's own client; it is created on demand
//! with the triggering port's media kind and the opposite direction.
//! Connection requests are issued unconditionally. A failure there is
//! a warning, since the link may already exist or a port may have just
//! vanished, but a boundary port that cannot be created is fatal: the
//! patch is authoritative.

use signal_hook::consts::SIGCHLD;

use crate::bus::{Event, EventBus};
use crate::children::ChildManager;
use crate::engine::{Engine, PortId};
use crate::patch::Patch;
use crate::{names, signals, Error};

pub struct Orchestrator<E: Engine> {
    engine: E,
    patch: Patch,
    children: ChildManager,
    /// This orchestrator's own global client name, which is also the
    /// namespace prefix of every direct child.
    global_name: String,
}

impl<E: Engine> Orchestrator<E> {
    pub fn new(
        engine: E,
        patch: Patch,
        children: ChildManager,
        global_name: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            patch,
            children,
            global_name: global_name.into(),
        }
    }

    /// Drive the whole session. Returns after a termination-class
    /// signal has been observed and the children have been asked to
    /// stop; errors are the fatal kind.
    pub fn run(&mut self, bus: &EventBus) -> Result<(), Error> {
        self.children.discover()?;
        self.children.start_all();
        log::info!("{}: entering event loop", self.global_name);

        loop {
            match bus.next_event()? {
                Event::Signal { signal, sender_pid } => {
                    if signal == SIGCHLD {
                        self.children.on_child_terminated(sender_pid);
                    } else if signals::is_termination(signal) {
                        log::info!("termination signal {signal}, shutting down");
                        break;
                    } else {
                        log::debug!("ignoring signal {signal}");
                    }
                }
                Event::Port {
                    port_id,
                    registered: true,
                } => self.on_port_registered(port_id)?,
                Event::Port {
                    port_id,
                    registered: false,
                } => log::debug!("port {port_id} unregistered"),
                Event::Client { name, registered } => {
                    if registered {
                        log::info!("client registered: {name}");
                    } else {
                        log::info!("client unregistered: {name}");
                    }
                }
            }
        }

        self.children.stop_all();
        self.children.forget_all();
        Ok(())
    }

    /// A port appeared somewhere in the server namespace. Wire it up if
    /// it belongs to one of our direct children.
    fn on_port_registered(&mut self, port_id: PortId) -> Result<(), Error> {
        let Some(port_global) = self.engine.port_name_by_id(port_id) else {
            log::warn!("registered port {port_id} vanished before lookup");
            return Ok(());
        };
        log::info!("port registered: {port_global}");

        let Some((client_global, _)) = names::split_port(&port_global) else {
            log::warn!("port name {port_global:?} has no client separator");
            return Ok(());
        };
        if !names::is_direct_child(&self.global_name, client_global) {
            return Ok(());
        }
        let Some(port_local) = names::port_global_to_local(&self.global_name, &port_global)
        else {
            return Ok(());
        };

        // Owned copies so the engine can be borrowed mutably below.
        let destinations: Vec<String> = self
            .patch
            .destinations_for(port_local)
            .map(String::from)
            .collect();
        let sources: Vec<String> = self
            .patch
            .sources_for(port_local)
            .map(String::from)
            .collect();

        for dst in destinations {
            self.ensure_boundary(&dst, &port_global)?;
            let dst_global = names::port_local_to_global(&self.global_name, &dst);
            self.request_connection(&port_global, &dst_global);
        }
        for src in sources {
            self.ensure_boundary(&src, &port_global)?;
            let src_global = names::port_local_to_global(&self.global_name, &src);
            self.request_connection(&src_global, &port_global);
        }
        Ok(())
    }

    /// If `endpoint_local` names a boundary port that does not exist
    /// yet, create it with the opposite direction of the triggering
    /// port. Pre-existing ports (including ones created by an earlier
    /// delivery of the same event) are left alone.
    fn ensure_boundary(&mut self, endpoint_local: &str, trigger_global: &str) -> Result<(), Error> {
        let Some(short_name) = endpoint_local.strip_prefix(names::PORT_SEP) else {
            return Ok(());
        };
        let boundary_global = names::port_local_to_global(&self.global_name, endpoint_local);
        if self.engine.port_exists(&boundary_global) {
            return Ok(());
        }
        let profile = self.engine.port_profile(trigger_global)?;
        self.engine.register_port(short_name, profile.opposite())?;
        log::info!("registered boundary port {boundary_global}");
        Ok(())
    }

    fn request_connection(&mut self, src_global: &str, dst_global: &str) {
        match self.engine.connect(src_global, dst_global) {
            Ok(()) => log::info!("connected {src_global} -> {dst_global}"),
            Err(e) => log::warn!("cannot connect {src_global} -> {dst_global}: {e}"),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn children(&self) -> &ChildManager {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ClientName;
    use crate::engine::{MediaKind, PortDirection, PortProfile};
    use std::collections::{HashMap, HashSet};
    use std::io::Write;

    const PREFIX: &str = "orchestra";

    /// Recording stand-in for the JACK adapter.
    struct MockEngine {
        ports_by_id: HashMap<PortId, String>,
        profiles: HashMap<String, PortProfile>,
        existing: HashSet<String>,
        registered: Vec<(String, PortProfile)>,
        connections: Vec<(String, String)>,
        reject_connections: bool,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                ports_by_id: HashMap::new(),
                profiles: HashMap::new(),
                existing: HashSet::new(),
                registered: Vec::new(),
                connections: Vec::new(),
                reject_connections: false,
            }
        }

        fn with_port(mut self, id: PortId, global: &str, profile: PortProfile) -> Self {
            self.ports_by_id.insert(id, global.to_string());
            self.profiles.insert(global.to_string(), profile);
            self.existing.insert(global.to_string());
            self
        }
    }

    impl Engine for MockEngine {
        fn port_name_by_id(&self, id: PortId) -> Option<String> {
            self.ports_by_id.get(&id).cloned()
        }

        fn port_exists(&self, port_global: &str) -> bool {
            self.existing.contains(port_global)
        }

        fn port_profile(&self, port_global: &str) -> Result<PortProfile, Error> {
            self.profiles
                .get(port_global)
                .copied()
                .ok_or_else(|| Error::UnknownPort(port_global.to_string()))
        }

        fn register_port(&mut self, short_name: &str, profile: PortProfile) -> Result<(), Error> {
            let global = format!("{PREFIX}:{short_name}");
            self.existing.insert(global.clone());
            self.profiles.insert(global, profile);
            self.registered.push((short_name.to_string(), profile));
            Ok(())
        }

        fn connect(&mut self, src_global: &str, dst_global: &str) -> Result<(), Error> {
            if self.reject_connections {
                return Err(Error::UnknownPort(src_global.to_string()));
            }
            self.connections
                .push((src_global.to_string(), dst_global.to_string()));
            Ok(())
        }
    }

    const AUDIO_OUT: PortProfile = PortProfile {
        media: MediaKind::Audio,
        direction: PortDirection::Output,
    };
    const AUDIO_IN: PortProfile = PortProfile {
        media: MediaKind::Audio,
        direction: PortDirection::Input,
    };

    fn make_patch(source: &str) -> Patch {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{source}").unwrap();
        Patch::load(f.path()).unwrap()
    }

    struct Scenario {
        orchestrator: Orchestrator<MockEngine>,
        bus: EventBus,
        publisher: crate::bus::Publisher,
        _root: tempfile::TempDir,
    }

    /// An orchestrator over an empty child root, a patch source and a
    /// pre-configured mock engine.
    fn scenario(patch_source: &str, engine: MockEngine) -> Scenario {
        let root = tempfile::tempdir().unwrap();
        let children = ChildManager::new(root.path(), PREFIX);
        let (bus, handle) = EventBus::new();
        Scenario {
            orchestrator: Orchestrator::new(engine, make_patch(patch_source), children, PREFIX),
            publisher: handle.publisher("test"),
            bus,
            _root: root,
        }
    }

    fn port_registered(id: PortId) -> Event {
        Event::Port {
            port_id: id,
            registered: true,
        }
    }

    fn sigterm() -> Event {
        Event::Signal {
            signal: libc::SIGTERM,
            sender_pid: 0,
        }
    }

    #[test]
    fn wires_child_to_child_rule() {
        let engine =
            MockEngine::new().with_port(7, "orchestra.foo:out", AUDIO_OUT);
        let mut s = scenario("foo:out -> bar:in", engine);

        s.publisher.publish(port_registered(7));
        s.publisher.publish(Event::Client {
            name: ClientName::from("orchestra.foo").unwrap(),
            registered: true,
        });
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();

        let engine = s.orchestrator.engine();
        assert_eq!(
            engine.connections,
            vec![(
                "orchestra.foo:out".to_string(),
                "orchestra.bar:in".to_string()
            )]
        );
        assert!(engine.registered.is_empty());
    }

    #[test]
    fn creates_boundary_port_with_opposite_direction() {
        let engine =
            MockEngine::new().with_port(3, "orchestra.synth:out", AUDIO_OUT);
        let mut s = scenario("synth:out -> :master", engine);

        s.publisher.publish(port_registered(3));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();

        let engine = s.orchestrator.engine();
        assert_eq!(engine.registered, vec![("master".to_string(), AUDIO_IN)]);
        assert_eq!(
            engine.connections,
            vec![(
                "orchestra.synth:out".to_string(),
                "orchestra:master".to_string()
            )]
        );
    }

    #[test]
    fn boundary_source_feeds_child_input() {
        let engine =
            MockEngine::new().with_port(4, "orchestra.sampler:in", AUDIO_IN);
        let mut s = scenario(":mic -> sampler:in", engine);

        s.publisher.publish(port_registered(4));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();

        let engine = s.orchestrator.engine();
        // The trigger is an input, so the boundary source faces it as
        // an output.
        assert_eq!(engine.registered, vec![("mic".to_string(), AUDIO_OUT)]);
        assert_eq!(
            engine.connections,
            vec![(
                "orchestra:mic".to_string(),
                "orchestra.sampler:in".to_string()
            )]
        );
    }

    #[test]
    fn redelivery_reconnects_but_registers_once() {
        let engine =
            MockEngine::new().with_port(3, "orchestra.synth:out", AUDIO_OUT);
        let mut s = scenario("synth:out -> :master", engine);

        s.publisher.publish(port_registered(3));
        s.publisher.publish(port_registered(3));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();

        let engine = s.orchestrator.engine();
        assert_eq!(engine.registered.len(), 1);
        assert_eq!(engine.connections.len(), 2);
    }

    #[test]
    fn ignores_ports_of_non_direct_children() {
        let engine = MockEngine::new()
            // One segment too deep, and one foreign client.
            .with_port(5, "orchestra.strings.violin:out", AUDIO_OUT)
            .with_port(6, "band.foo:out", AUDIO_OUT);
        let mut s = scenario("foo:out -> bar:in  strings.violin:out -> bar:in", engine);

        s.publisher.publish(port_registered(5));
        s.publisher.publish(port_registered(6));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();

        assert!(s.orchestrator.engine().connections.is_empty());
        assert!(s.orchestrator.engine().registered.is_empty());
    }

    #[test]
    fn failed_connection_request_is_not_fatal() {
        let mut engine =
            MockEngine::new().with_port(7, "orchestra.foo:out", AUDIO_OUT);
        engine.reject_connections = true;
        let mut s = scenario("foo:out -> bar:in", engine);

        s.publisher.publish(port_registered(7));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();
        assert!(s.orchestrator.engine().connections.is_empty());
    }

    #[test]
    fn duplicate_rules_connect_once_each() {
        let engine =
            MockEngine::new().with_port(7, "orchestra.foo:out", AUDIO_OUT);
        let mut s = scenario("foo:out -> bar:in  foo:out -> bar:in", engine);

        s.publisher.publish(port_registered(7));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();
        assert_eq!(s.orchestrator.engine().connections.len(), 2);
    }

    #[test]
    fn destination_matches_precede_source_matches() {
        // foo:mid is both a source and a destination in the patch.
        let engine =
            MockEngine::new().with_port(9, "orchestra.foo:mid", AUDIO_IN);
        let mut s = scenario("foo:mid -> b:in  a:out -> foo:mid", engine);

        s.publisher.publish(port_registered(9));
        s.publisher.publish(sigterm());
        s.orchestrator.run(&s.bus).unwrap();

        assert_eq!(
            s.orchestrator.engine().connections,
            vec![
                (
                    "orchestra.foo:mid".to_string(),
                    "orchestra.b:in".to_string()
                ),
                (
                    "orchestra.a:out".to_string(),
                    "orchestra.foo:mid".to_string()
                ),
            ]
        );
    }

    #[test]
    fn unknown_trigger_profile_is_fatal_when_boundary_needed() {
        // Port resolvable by id, but no profile behind it.
        let mut engine = MockEngine::new();
        engine
            .ports_by_id
            .insert(3, "orchestra.synth:out".to_string());
        let mut s = scenario("synth:out -> :master", engine);

        s.publisher.publish(port_registered(3));
        assert!(matches!(
            s.orchestrator.run(&s.bus),
            Err(Error::UnknownPort(_))
        ));
    }

    #[test]
    fn termination_stops_children_and_ends_dispatch() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        for name in ["violin", "viola"] {
            let dir = root.path().join(name);
            fs::create_dir(&dir).unwrap();
            let run = dir.join("run");
            // Announce the trap before idling, so the stop request
            // cannot outrun its installation.
            fs::write(
                &run,
                "#!/bin/sh\ntrap 'touch stopped; exit 0' TERM\ntouch ready\nwhile :; do sleep 1; done\n",
            )
            .unwrap();
            fs::set_permissions(&run, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine =
            MockEngine::new().with_port(7, "orchestra.foo:out", AUDIO_OUT);
        let children = ChildManager::new(root.path(), PREFIX);
        let (bus, handle) = EventBus::new();
        let publisher = handle.publisher("test");
        let mut orchestrator =
            Orchestrator::new(engine, make_patch("foo:out -> bar:in"), children, PREFIX);

        // The loop blocks in the bus, so shutdown is driven from a
        // helper thread once both children are known to be trap-ready.
        let ready: Vec<_> = ["violin", "viola"]
            .iter()
            .map(|name| root.path().join(name).join("ready"))
            .collect();
        let driver = std::thread::spawn(move || {
            let mut all_ready = false;
            for _ in 0..100 {
                if ready.iter().all(|p| p.exists()) {
                    all_ready = true;
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            publisher.publish(sigterm());
            // Arrives after the termination signal: must never be
            // dispatched.
            publisher.publish(port_registered(7));
            all_ready
        });

        orchestrator.run(&bus).unwrap();
        assert!(driver.join().unwrap(), "children never became trap-ready");

        assert!(orchestrator.children().is_empty());
        assert!(orchestrator.engine().connections.is_empty());

        // Both children saw the stop request.
        for name in ["violin", "viola"] {
            let marker = root.path().join(name).join("stopped");
            let mut seen = false;
            for _ in 0..100 {
                if marker.exists() {
                    seen = true;
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            assert!(seen, "child {name} never observed the stop request");
        }
    }

    #[test]
    fn sigchld_clears_tracked_child() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("drum");
        fs::create_dir(&dir).unwrap();
        let run = dir.join("run");
        fs::write(&run, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&run, fs::Permissions::from_mode(0o755)).unwrap();

        let children = ChildManager::new(root.path(), PREFIX);
        let (bus, handle) = EventBus::new();
        let publisher = handle.publisher("test");
        let mut orchestrator =
            Orchestrator::new(MockEngine::new(), make_patch(""), children, PREFIX);

        // Run startup by hand so the pid is observable mid-loop.
        orchestrator.children.discover().unwrap();
        orchestrator.children.start_all();
        let pid = orchestrator.children().get("drum").unwrap().pid().unwrap();

        publisher.publish(Event::Signal {
            signal: libc::SIGCHLD,
            sender_pid: pid as i32,
        });
        publisher.publish(sigterm());
        orchestrator.run(&bus).unwrap();
        assert!(orchestrator.children().is_empty());
    }
}
