//! `ensureHostAuth` (§4.3.7, §8 properties 1–2): idempotent `pg_hba.conf`
//! patching so the engine can connect without a password.

use std::path::Path;

use tracing::debug;

use crate::errors::Result;

const TRUST_V4: &str = "host all all 0.0.0.0/0 trust";
const TRUST_V6: &str = "host all all ::/0 trust";

/// Appends trust entries for `0.0.0.0/0` and `::/0` to
/// `<data_dir>/pgdata/pg_hba.conf` if not already present.
///
/// A missing file is a no-op (initdb will produce one later). Any other
/// read error is propagated.
pub async fn ensure_host_auth(data_dir: &Path) -> Result<()> {
    let path = data_dir.join("pgdata").join("pg_hba.conf");

    let existing = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("pg_hba.conf not present yet at {}", path.display());
            return Ok(());
        }
        Err(err) => {
            return Err(crate::errors::RuntimeError::Other(format!(
                "failed to read {}: {err}",
                path.display()
            ))
            .into());
        }
    };

    let has_v4 = existing.lines().any(|l| l.trim() == TRUST_V4);
    let has_v6 = existing.lines().any(|l| l.trim() == TRUST_V6);
    if has_v4 && has_v6 {
        return Ok(());
    }

    let mut patched = existing.clone();
    if !patched.is_empty() && !patched.ends_with('\n') {
        patched.push('\n');
    }
    if !has_v4 {
        patched.push_str(TRUST_V4);
        patched.push('\n');
    }
    if !has_v6 {
        patched.push_str(TRUST_V6);
        patched.push('\n');
    }

    tokio::fs::write(&path, patched).await.map_err(|err| {
        crate::errors::RuntimeError::Other(format!("failed to write {}: {err}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_hba(dir: &Path, contents: &str) {
        let pgdata = dir.join("pgdata");
        tokio::fs::create_dir_all(&pgdata).await.unwrap();
        tokio::fs::write(pgdata.join("pg_hba.conf"), contents).await.unwrap();
    }

    async fn read_hba(dir: &Path) -> String {
        tokio::fs::read_to_string(dir.join("pgdata").join("pg_hba.conf"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        ensure_host_auth(dir.path()).await.unwrap();
        assert!(!dir.path().join("pgdata").join("pg_hba.conf").exists());
    }

    #[tokio::test]
    async fn appends_missing_entries_with_leading_newline() {
        let dir = tempfile::tempdir().unwrap();
        write_hba(dir.path(), "local all all trust").await;
        ensure_host_auth(dir.path()).await.unwrap();
        let contents = read_hba(dir.path()).await;
        assert_eq!(
            contents,
            format!("local all all trust\n{TRUST_V4}\n{TRUST_V6}\n")
        );
    }

    #[tokio::test]
    async fn idempotent_across_two_invocations() {
        let dir = tempfile::tempdir().unwrap();
        write_hba(dir.path(), "local all all trust\n").await;
        ensure_host_auth(dir.path()).await.unwrap();
        let once = read_hba(dir.path()).await;
        ensure_host_auth(dir.path()).await.unwrap();
        let twice = read_hba(dir.path()).await;
        assert_eq!(once, twice);
        assert_eq!(once.matches(TRUST_V4).count(), 1);
        assert_eq!(once.matches(TRUST_V6).count(), 1);
    }

    #[tokio::test]
    async fn no_trailing_newline_inserted_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        write_hba(dir.path(), "local all all trust").await;
        ensure_host_auth(dir.path()).await.unwrap();
        let contents = read_hba(dir.path()).await;
        assert!(contents.starts_with("local all all trust\nhost"));
    }
}
