//! Host-path normalization and bind-spec assembly (§4.3, §8 property 9).
//!
//! `docker_host_path_style = linux` is the only recognized style: it maps
//! Windows drive-letter paths and WSL UNC paths onto the path the Linux-side
//! `docker` CLI (WSL2 integration, or Docker Desktop's Linux VM) actually
//! expects in a bind-mount spec.

use crate::errors::{Result, RuntimeError};

/// How to interpret a host path before handing it to `docker run -v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStyle {
    /// Pass host paths through unchanged.
    #[default]
    Native,
    /// Apply Windows-drive-letter and WSL-UNC normalization.
    Linux,
}

/// Normalizes `host_path` per `style`.
#[must_use] 
pub fn normalize_host_path(host_path: &str, style: PathStyle) -> String {
    if style != PathStyle::Linux {
        return host_path.to_string();
    }

    if let Some(rest) = strip_wsl_unc_prefix(host_path) {
        return rest;
    }

    if let Some(converted) = convert_drive_letter(host_path) {
        return converted;
    }

    host_path.to_string()
}

/// `\\wsl$\Distro\...` or `\\wsl.localhost\Distro\...` → the in-WSL path,
/// dropping the distro segment. Any other UNC path is left untouched.
fn strip_wsl_unc_prefix(path: &str) -> Option<String> {
    let rest = path
        .strip_prefix(r"\\wsl$\")
        .or_else(|| path.strip_prefix(r"\\wsl.localhost\"))?;
    // rest is "Distro\tmp\x"; drop the distro segment.
    let (_distro, tail) = rest.split_once('\\').unwrap_or((rest, ""));
    let normalized = tail.replace('\\', "/");
    Some(format!("/{normalized}"))
}

/// `D:\a\temp\store` → `/mnt/d/a/temp/store`; `C:\` → `/mnt/c`.
fn convert_drive_letter(path: &str) -> Option<String> {
    let mut chars = path.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() {
        return None;
    }
    if chars.next() != Some(':') {
        return None;
    }
    let rest = &path[2..];
    let rest = rest.strip_prefix('\\').unwrap_or(rest);
    let drive_lower = drive.to_ascii_lowercase();
    if rest.is_empty() {
        return Some(format!("/mnt/{drive_lower}"));
    }
    let normalized = rest.replace('\\', "/");
    Some(format!("/mnt/{drive_lower}/{normalized}"))
}

/// Produces the final `HOST:CONTAINER[:ro]` bind specification.
#[must_use] 
pub fn docker_bind_spec(host_path: &str, container_path: &str, read_only: bool, style: PathStyle) -> String {
    let host = normalize_host_path(host_path, style);
    if read_only {
        format!("{host}:{container_path}:ro")
    } else {
        format!("{host}:{container_path}")
    }
}

/// Parses `docker port <id> 5432/tcp` output (§8 property 9, §4.3.3 step 9):
/// one or more `ADDR:PORT` lines, accepting the first whose trailing
/// `:`-delimited field parses as an integer.
pub fn parse_host_port(output: &str) -> Result<u16> {
    for line in output.lines() {
        let line = line.trim();
        if let Some((_, port)) = line.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return Ok(port);
            }
        }
    }
    Err(RuntimeError::PortParse {
        output: output.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_letter_with_path_converts() {
        assert_eq!(
            normalize_host_path(r"D:\a\temp\store", PathStyle::Linux),
            "/mnt/d/a/temp/store"
        );
    }

    #[test]
    fn bare_drive_letter_converts() {
        assert_eq!(normalize_host_path(r"C:\", PathStyle::Linux), "/mnt/c");
    }

    #[test]
    fn wsl_dollar_unc_strips_distro() {
        assert_eq!(
            normalize_host_path(r"\\wsl$\Ubuntu-24.04\tmp\store", PathStyle::Linux),
            "/tmp/store"
        );
    }

    #[test]
    fn wsl_localhost_unc_strips_distro() {
        assert_eq!(
            normalize_host_path(r"\\wsl.localhost\Ubuntu\home\x", PathStyle::Linux),
            "/home/x"
        );
    }

    #[test]
    fn other_unc_paths_pass_through() {
        assert_eq!(
            normalize_host_path(r"\\server\share\path", PathStyle::Linux),
            r"\\server\share\path"
        );
    }

    #[test]
    fn native_style_never_converts() {
        assert_eq!(normalize_host_path(r"D:\a\temp\store", PathStyle::Native), r"D:\a\temp\store");
    }

    #[test]
    fn bind_spec_applies_style_and_ro_suffix() {
        assert_eq!(
            docker_bind_spec(r"D:\a\temp\store", "/var/lib/postgresql/data", false, PathStyle::Linux),
            "/mnt/d/a/temp/store:/var/lib/postgresql/data"
        );
        assert_eq!(
            docker_bind_spec("/data", "/pgdata", true, PathStyle::Native),
            "/data:/pgdata:ro"
        );
    }

    #[test]
    fn parse_host_port_picks_first_valid_line() {
        assert_eq!(parse_host_port("0.0.0.0:5432\n").unwrap(), 5432);
        assert_eq!(parse_host_port("invalid\n0.0.0.0:5433\n").unwrap(), 5433);
    }

    #[test]
    fn parse_host_port_errors_on_empty_input() {
        assert!(parse_host_port("").is_err());
    }
}
