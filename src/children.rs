//! Child supervisor
//!
//! Owns the set of supervised audio-client processes. A subdirectory of
//! the root qualifies as a child while it contains an executable `run`
//! entry point; each child is launched with its own directory as working
//! directory and its global name as invocation identity.
//!
//! Only the orchestrator thread ever touches this state. Child exit is
//! never waited for synchronously; it arrives later as a SIGCHLD event
//! and lands in [`ChildManager::on_child_terminated`].

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::names;
use crate::Error;

/// Relative path of the entry point that makes a directory a child.
const RUN_ENTRY: &str = "run";

/// One supervised subprocess.
pub struct Child {
    local_name: String,
    global_name: String,
    dir: PathBuf,
    /// Present while the child is believed running. The supervisor is
    /// the sole writer.
    process: Option<std::process::Child>,
}

impl Child {
    fn new(root: &Path, prefix: &str, local_name: String) -> Self {
        let global_name = format!("{prefix}{}{local_name}", names::NAMESPACE_SEP);
        let dir = root.join(&local_name);
        Self {
            local_name,
            global_name,
            dir,
            process: None,
        }
    }

    /// The directory still carries an executable entry point.
    pub fn is_runnable(&self) -> bool {
        is_executable(&self.dir.join(RUN_ENTRY))
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.id())
    }

    /// Spawn `./run` with argv0 = local name, argv1 = global name, cwd =
    /// the child's own directory.
    fn start(&mut self) -> Result<(), std::io::Error> {
        let child = Command::new(format!("./{RUN_ENTRY}"))
            .arg0(&self.local_name)
            .arg(&self.global_name)
            .current_dir(&self.dir)
            .spawn()?;
        log::info!("started child {} (pid {})", self.local_name, child.id());
        self.process = Some(child);
        Ok(())
    }

    /// Request termination. Does not wait: the exit is observed later
    /// through the child-death signal.
    fn stop(&mut self) {
        if let Some(process) = &self.process {
            let pid = process.id();
            log::info!("stopping child {} (pid {})", self.local_name, pid);
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                log::warn!(
                    "kill({pid}) failed: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    /// The tracked pid was reported dead: reap it and clear to
    /// not-running. A pid that is not yet waitable (the report can
    /// outrun waitability, and a merely stopped child also raises the
    /// report) keeps its handle so a later report can reap it.
    fn reap(&mut self) {
        let Some(process) = &mut self.process else {
            return;
        };
        match process.try_wait() {
            Ok(Some(status)) => {
                log::info!("child {} exited: {status}", self.local_name);
                self.process = None;
            }
            Ok(None) => log::warn!(
                "child {} reported dead but not yet waitable, keeping handle",
                self.local_name
            ),
            Err(e) => {
                log::warn!("cannot reap child {}: {e}", self.local_name);
                self.process = None;
            }
        }
    }
}

pub struct ChildManager {
    root: PathBuf,
    prefix: String,
    children: BTreeMap<String, Child>,
}

impl ChildManager {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            children: BTreeMap::new(),
        }
    }

    /// Scan the root for qualifying directories. Additive only: existing
    /// entries, in particular their tracked pids, are left alone.
    pub fn discover(&mut self) -> Result<(), Error> {
        let entries = fs::read_dir(&self.root).map_err(|source| Error::ChildRoot {
            path: self.root.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| Error::ChildRoot {
                path: self.root.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(local_name) = entry.file_name().to_str().map(String::from) else {
                log::warn!("skipping non-UTF-8 directory name {:?}", entry.file_name());
                continue;
            };
            if self.children.contains_key(&local_name) {
                continue;
            }
            let child = Child::new(&self.root, &self.prefix, local_name.clone());
            if child.is_runnable() {
                log::info!("discovered child {local_name}");
                self.children.insert(local_name, child);
            }
        }
        Ok(())
    }

    /// Launch every child not currently believed running. A spawn
    /// failure (the entry point vanished since discovery) is
    /// operational: warn and move on.
    pub fn start_all(&mut self) {
        for child in self.children.values_mut() {
            if child.is_running() {
                continue;
            }
            if let Err(e) = child.start() {
                log::warn!("cannot start child {}: {e}", child.local_name);
            }
        }
    }

    /// Send a stop request to every running child.
    pub fn stop_all(&mut self) {
        for child in self.children.values_mut() {
            if child.is_running() {
                child.stop();
            }
        }
    }

    /// A child-death signal arrived for `pid`. Clears exactly the child
    /// tracking that pid; an unknown pid belongs to something else (an
    /// already-removed entry, a reaped grandchild) and is ignored.
    pub fn on_child_terminated(&mut self, pid: i32) {
        match self
            .children
            .values_mut()
            .find(|c| c.pid() == Some(pid as u32))
        {
            Some(child) => child.reap(),
            None => log::debug!("ignoring exit of untracked pid {pid}"),
        }
    }

    /// Re-check every child's entry point; whatever no longer qualifies
    /// is stopped (if running) and dropped from the set.
    pub fn revalidate(&mut self) {
        self.children.retain(|local_name, child| {
            if child.is_runnable() {
                return true;
            }
            log::info!("child {local_name} is no longer runnable, removing");
            if child.is_running() {
                child.stop();
            }
            false
        });
    }

    /// Drop all bookkeeping without stopping anything. Final shutdown
    /// only, after the children have already been asked to stop.
    pub fn forget_all(&mut self) {
        self.children.clear();
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, local_name: &str) -> Option<&Child> {
        self.children.get(local_name)
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
