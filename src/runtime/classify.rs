//! Output-substring error classification (§4.3.8).
//!
//! Kept in one place and exhaustively unit-tested, per the spec's design
//! note that this policy table must not be scattered across call sites —
//! mirrors the upstream crate's `DockerError::classify`-style helpers in
//! spirit, generalized to PostgreSQL-specific permission patterns.

/// Hint for the Docker Desktop not-running substring match.
pub const HINT_DESKTOP: &str = "start Docker Desktop and retry";
/// Hint for the generic daemon/unix-socket substring match.
pub const HINT_DAEMON: &str = "start the Docker daemon and retry";
/// Fallback hint when no more specific pattern matched.
pub const HINT_GENERIC: &str = "start Docker and retry";

/// True if `output` (already expected to be checked case-insensitively)
/// indicates the docker daemon itself is unreachable.
#[must_use] 
pub fn is_docker_unavailable(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("cannot connect to the docker daemon")
        || lower.contains("failed to connect to the docker api")
        || lower.contains("is the docker daemon running")
        || lower.contains("dockerdesktoplinuxengine")
        || (lower.contains("npipe") && lower.contains("docker") && lower.contains("pipe"))
}

/// Picks the remediation hint for a daemon-unavailable output.
#[must_use] 
pub fn docker_unavailable_hint(output: &str) -> &'static str {
    let lower = output.to_lowercase();
    if lower.contains("dockerdesktoplinuxengine") || lower.contains("npipe") {
        HINT_DESKTOP
    } else if lower.contains("docker.sock") || lower.contains("unix://") {
        HINT_DAEMON
    } else {
        HINT_GENERIC
    }
}

/// True if `output` indicates the referenced container does not exist, or
/// is already stopped — the idempotent-teardown case for `Stop`.
#[must_use] 
pub fn is_docker_not_found(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("no such container") || (lower.contains("is not running") && lower.contains("container"))
}

/// True if `output` indicates a PGDATA permission problem this filesystem
/// cannot support (e.g. Docker Desktop bind-mounting through a VM that
/// silently drops `chown`/`chmod`).
#[must_use] 
pub fn is_permission_not_supported(output: &str, pgdata_path: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("initdb: error: could not change permissions of directory")
        || (lower.contains("chown") && lower.contains("operation not permitted"))
        || (lower.contains("chmod") && lower.contains("operation not permitted"))
        || (lower.contains("operation not permitted")
            && lower.contains("permissions")
            && lower.contains("data"))
        || (lower.contains("operation not permitted") && lower.contains(&pgdata_path.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_docker_desktop_unavailable() {
        let out = "error during connect: this error may indicate that the docker daemon is not running: open //./pipe/dockerDesktopLinuxEngine";
        assert!(is_docker_unavailable(out));
        assert_eq!(docker_unavailable_hint(out), HINT_DESKTOP);
    }

    #[test]
    fn classifies_unix_socket_unavailable() {
        let out = "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?";
        assert!(is_docker_unavailable(out));
        assert_eq!(docker_unavailable_hint(out), HINT_DAEMON);
    }

    #[test]
    fn classifies_generic_unavailable() {
        let out = "failed to connect to the docker API";
        assert!(is_docker_unavailable(out));
        assert_eq!(docker_unavailable_hint(out), HINT_GENERIC);
    }

    #[test]
    fn unrelated_errors_are_not_unavailable() {
        assert!(!is_docker_unavailable("no such file or directory"));
    }

    #[test]
    fn not_found_covers_both_phrasings() {
        assert!(is_docker_not_found("Error: No such container: abc123"));
        assert!(is_docker_not_found("Error response: container abc123 is not running"));
        assert!(!is_docker_not_found("connection refused"));
    }

    #[test]
    fn permission_patterns_match() {
        let pgdata = "/data/pgdata";
        assert!(is_permission_not_supported(
            "initdb: error: could not change permissions of directory \"/data/pgdata\": Operation not permitted",
            pgdata
        ));
        assert!(is_permission_not_supported("chown: operation not permitted", pgdata));
        assert!(is_permission_not_supported("chmod: Operation not permitted", pgdata));
        assert!(is_permission_not_supported(
            "Operation not permitted setting permissions on data directory",
            pgdata
        ));
        assert!(is_permission_not_supported(
            "Operation not permitted: /data/pgdata",
            pgdata
        ));
        assert!(!is_permission_not_supported("disk full", pgdata));
    }
}
