//! Name translation
//!
//! Pure helpers mapping between the three forms a port name takes:
//! local (`out`), client-local (`instrument:out`) and global
//! (`orchestra.part.instrument:out`). Client names nest with `.`;
//! a port hangs off its client with `:`. A client-local name starting
//! with the `:` marker (`:master`) denotes a boundary port, a port on
//! the orchestrator's own client rather than on a child.

/// Separator between namespace segments of a client name.
pub const NAMESPACE_SEP: char = '.';

/// Separator between a client name and a port name.
pub const PORT_SEP: char = ':';

/// True when `client_global` names a direct child of `prefix`: exactly
/// one extra namespace segment, no deeper nesting.
pub fn is_direct_child(prefix: &str, client_global: &str) -> bool {
    client_global
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(NAMESPACE_SEP))
        .is_some_and(|segment| !segment.is_empty() && !segment.contains(NAMESPACE_SEP))
}

/// Last namespace segment of a client global name.
pub fn client_local_name(client_global: &str) -> &str {
    client_global
        .rsplit(NAMESPACE_SEP)
        .next()
        .unwrap_or(client_global)
}

/// Split a global port name into (client, port) at the first `:`.
/// `None` when there is no separator; such a string is not a port name.
pub fn split_port(port_global: &str) -> Option<(&str, &str)> {
    port_global.split_once(PORT_SEP)
}

/// Qualify a client-local port name under `prefix`.
///
/// `:master` (boundary) becomes `prefix:master`; `instrument:out`
/// (child port) becomes `prefix.instrument:out`.
pub fn port_local_to_global(prefix: &str, port_local: &str) -> String {
    if port_local.starts_with(PORT_SEP) {
        format!("{prefix}{port_local}")
    } else {
        format!("{prefix}{NAMESPACE_SEP}{port_local}")
    }
}

/// Inverse of [`port_local_to_global`]. `None` when `port_global` does
/// not live directly under `prefix`.
pub fn port_global_to_local<'a>(prefix: &str, port_global: &'a str) -> Option<&'a str> {
    let rest = port_global.strip_prefix(prefix)?;
    if rest.starts_with(PORT_SEP) {
        Some(rest)
    } else {
        rest.strip_prefix(NAMESPACE_SEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "orchestra.strings";

    #[test]
    fn direct_child_detection() {
        assert!(is_direct_child(PREFIX, "orchestra.strings.violin"));
        // Grandchild: one segment too deep.
        assert!(!is_direct_child(PREFIX, "orchestra.strings.violin.pickup"));
        // The orchestrator itself.
        assert!(!is_direct_child(PREFIX, "orchestra.strings"));
        // Sibling namespace that happens to share a textual prefix.
        assert!(!is_direct_child(PREFIX, "orchestra.strings2.viola"));
        assert!(!is_direct_child(PREFIX, "orchestra.brass.trumpet"));
        assert!(!is_direct_child(PREFIX, "orchestra.strings."));
    }

    #[test]
    fn client_local_is_last_segment() {
        assert_eq!(client_local_name("orchestra.strings.violin"), "violin");
        assert_eq!(client_local_name("violin"), "violin");
    }

    #[test]
    fn split_port_at_first_separator() {
        assert_eq!(
            split_port("orchestra.strings.violin:out"),
            Some(("orchestra.strings.violin", "out"))
        );
        assert_eq!(split_port("no-separator-here"), None);
    }

    #[test]
    fn child_port_round_trip() {
        let global = port_local_to_global(PREFIX, "violin:out");
        assert_eq!(global, "orchestra.strings.violin:out");
        assert_eq!(port_global_to_local(PREFIX, &global), Some("violin:out"));
    }

    #[test]
    fn boundary_port_round_trip() {
        let global = port_local_to_global(PREFIX, ":master");
        assert_eq!(global, "orchestra.strings:master");
        assert_eq!(port_global_to_local(PREFIX, &global), Some(":master"));
    }

    #[test]
    fn foreign_port_translates_to_none() {
        assert_eq!(port_global_to_local(PREFIX, "orchestra.brass:out"), None);
    }
}
