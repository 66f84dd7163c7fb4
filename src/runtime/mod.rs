//! `DockerRuntime` (§4.3): drives the container engine CLI to realize the
//! `Instance` lifecycle — init, resolve, start, exec, stop, wait-for-ready,
//! and one-shot run.
//!
//! Grounded in the upstream crate's `DockerClient`: a thin struct wrapping a
//! process executor, with one method per docker subcommand and error
//! reclassification applied uniformly at the call boundary.

pub mod classify;
pub mod hostauth;
pub mod path;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::errors::{CommandError, Error, Result, RuntimeError};
use crate::executor::{self, CommandOutput, CommandRunner};
use crate::mount::HostMount;
use crate::types::{ExecRequest, Instance, RunRequest, StartRequest};
use path::PathStyle;

const PGDATA_MOUNT: &str = "/var/lib/postgresql/data";
const PGDATA_ROOT: &str = "/var/lib/postgresql/data/pgdata";

/// Configuration for a [`DockerRuntime`].
#[derive(Debug, Clone)]
pub struct DockerRuntimeConfig {
    /// Overrides binary discovery; `None` resolves `docker` via `PATH`.
    pub docker_binary: Option<PathBuf>,
    /// Whether to apply Windows/WSL host-path normalization to bind specs.
    pub host_path_style: PathStyle,
    /// Budget for [`DockerRuntime::wait_for_ready`].
    pub readiness_timeout: Duration,
    /// Grace period passed to `docker stop -t`.
    pub stop_timeout: Duration,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: None,
            host_path_style: PathStyle::Native,
            readiness_timeout: crate::DEFAULT_READINESS_TIMEOUT,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// The container driver (§4.3). Safe for concurrent method calls; owns no
/// mutable state after construction.
#[derive(Debug)]
pub struct DockerRuntime<R: CommandRunner> {
    runner: R,
    host_mount: Option<HostMount<R>>,
    config: DockerRuntimeConfig,
}

impl<R: CommandRunner> DockerRuntime<R> {
    /// Creates a runtime. `host_mount`, if given, is checked before any
    /// operation that touches the host data directory.
    pub fn new(runner: R, host_mount: Option<HostMount<R>>, config: DockerRuntimeConfig) -> Self {
        Self {
            runner,
            host_mount,
            config,
        }
    }

    /// Exposes the underlying runner for test assertions on call history.
    #[cfg(test)]
    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    async fn ensure_mount(&self, cancel: &CancellationToken) -> Result<()> {
        match &self.host_mount {
            Some(mount) => mount.ensure_ready(cancel).await,
            None => Ok(()),
        }
    }

    fn binary_path(&self) -> Result<PathBuf> {
        match &self.config.docker_binary {
            Some(path) => Ok(path.clone()),
            None => executor::find_binary("docker"),
        }
    }

    fn bind(&self, host_path: &str, container_path: &str, read_only: bool) -> String {
        path::docker_bind_spec(host_path, container_path, read_only, self.config.host_path_style)
    }

    /// Runs `docker <args>`, reclassifying daemon-unavailable output (§4.3.8)
    /// uniformly. Other non-zero exits are returned as
    /// [`CommandError::NonZeroExit`] so callers can apply their own
    /// operation-specific reclassification.
    async fn run_docker(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        let binary = self.binary_path()?;
        match self
            .runner
            .run(&binary.to_string_lossy(), args, stdin, cancel)
            .await
        {
            Ok(out) => Ok(out),
            Err(Error::Command(CommandError::NonZeroExit {
                program,
                exit_code,
                output,
            })) => {
                if classify::is_docker_unavailable(&output) {
                    Err(RuntimeError::DockerUnavailable {
                        hint: classify::docker_unavailable_hint(&output),
                        source: Box::new(CommandError::NonZeroExit {
                            program,
                            exit_code,
                            output,
                        }),
                    }
                    .into())
                } else {
                    Err(CommandError::NonZeroExit {
                        program,
                        exit_code,
                        output,
                    }
                    .into())
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn exec_as(
        &self,
        id: &str,
        user: Option<&str>,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("container id must not be blank".to_string()));
        }
        let mut full = vec!["exec".to_string()];
        if let Some(user) = user {
            full.push("-u".to_string());
            full.push(user.to_string());
        }
        full.push(id.to_string());
        full.extend(args);
        self.run_docker(&full, None, cancel).await
    }

    async fn run_permission_command(
        &self,
        image: &str,
        data_dir: &str,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let bind = self.bind(data_dir, PGDATA_MOUNT, false);
        let mut full = vec!["run".to_string(), "--rm".to_string(), "-v".to_string(), bind, image.to_string()];
        full.extend(args);
        match self.run_docker(&full, None, cancel).await {
            Ok(_) => Ok(()),
            Err(Error::Command(CommandError::NonZeroExit { output, .. })) => {
                let pgdata_path = format!("{data_dir}/pgdata");
                if classify::is_permission_not_supported(&output, &pgdata_path) {
                    Err(RuntimeError::PermissionNotSupported.into())
                } else {
                    Err(RuntimeError::Other("data directory setup failed".to_string()).into())
                }
            }
            Err(other) => Err(other),
        }
    }

    /// `ensureDataDirOwner` (§4.3.1 step 2, §4.3.3 step 2): mkdir, chown,
    /// chmod the PGDATA root via three throwaway containers.
    async fn ensure_data_dir_owner(&self, image: &str, data_dir: &str, cancel: &CancellationToken) -> Result<()> {
        self.run_permission_command(
            image,
            data_dir,
            vec!["mkdir".to_string(), "-p".to_string(), PGDATA_ROOT.to_string()],
            cancel,
        )
        .await?;
        self.run_permission_command(
            image,
            data_dir,
            vec![
                "chown".to_string(),
                "-R".to_string(),
                "postgres:postgres".to_string(),
                PGDATA_ROOT.to_string(),
            ],
            cancel,
        )
        .await?;
        self.run_permission_command(
            image,
            data_dir,
            vec!["chmod".to_string(), "-R".to_string(), "0700".to_string(), PGDATA_ROOT.to_string()],
            cancel,
        )
        .await
    }

    async fn probe_pg_version_in_container(&self, image: &str, data_dir: &str, cancel: &CancellationToken) -> bool {
        let bind = self.bind(data_dir, PGDATA_MOUNT, false);
        self.run_docker(
            &[
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                bind,
                image.to_string(),
                "test".to_string(),
                "-f".to_string(),
                format!("{PGDATA_ROOT}/PG_VERSION"),
            ],
            None,
            cancel,
        )
        .await
        .is_ok()
    }

    /// `InitBase(image, data_dir)` (§4.3.1).
    pub async fn init_base(&self, image: &str, data_dir: &str, cancel: &CancellationToken) -> Result<()> {
        if image.trim().is_empty() || data_dir.trim().is_empty() {
            return Err(Error::InvalidInput("image and data_dir must not be blank".to_string()));
        }
        self.ensure_mount(cancel).await?;
        self.ensure_data_dir_owner(image, data_dir, cancel).await?;

        let host_pg_version = Path::new(data_dir).join("pgdata").join("PG_VERSION");
        let host_exists = tokio::fs::try_exists(&host_pg_version).await.unwrap_or(false);
        let exists = if host_exists {
            true
        } else {
            self.probe_pg_version_in_container(image, data_dir, cancel).await
        };

        if exists {
            hostauth::ensure_host_auth(Path::new(data_dir)).await?;
            return Ok(());
        }

        let bind = self.bind(data_dir, PGDATA_MOUNT, false);
        let init_result = self
            .run_docker(
                &[
                    "run".to_string(),
                    "--rm".to_string(),
                    "-u".to_string(),
                    "postgres".to_string(),
                    "-v".to_string(),
                    bind,
                    image.to_string(),
                    "initdb".to_string(),
                    "--username=sqlrs".to_string(),
                    "--auth=trust".to_string(),
                    "--auth-host=trust".to_string(),
                    "--auth-local=trust".to_string(),
                    "-D".to_string(),
                    PGDATA_ROOT.to_string(),
                ],
                None,
                cancel,
            )
            .await;

        if self.probe_pg_version_in_container(image, data_dir, cancel).await {
            hostauth::ensure_host_auth(Path::new(data_dir)).await?;
            return Ok(());
        }

        let pgdata_path = format!("{data_dir}/pgdata");
        match init_result {
            Ok(_) => Err(RuntimeError::Other(
                "initdb reported success but PG_VERSION is still missing".to_string(),
            )
            .into()),
            Err(err) => Err(classify_initdb_error(err, &pgdata_path)),
        }
    }

    /// `ResolveImage(image_id)` (§4.3.2).
    pub async fn resolve_image(&self, image_id: &str, cancel: &CancellationToken) -> Result<String> {
        if image_id.trim().is_empty() {
            return Err(Error::InvalidInput("image_id must not be blank".to_string()));
        }
        if image_id.contains('@') {
            return Ok(image_id.to_string());
        }
        if let Some(digest) = self.inspect_digest(image_id, cancel).await? {
            return Ok(digest);
        }
        self.run_docker(&["pull".to_string(), image_id.to_string()], None, cancel)
            .await?;
        match self.inspect_digest(image_id, cancel).await? {
            Some(digest) => Ok(digest),
            None => Err(RuntimeError::Other(format!("no digest found for {image_id} after pull")).into()),
        }
    }

    async fn inspect_digest(&self, image_id: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        match self
            .run_docker(
                &[
                    "image".to_string(),
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{index .RepoDigests 0}}".to_string(),
                    image_id.to_string(),
                ],
                None,
                cancel,
            )
            .await
        {
            Ok(out) => {
                let line = out.combined.lines().next().unwrap_or("").trim();
                Ok((!line.is_empty()).then(|| line.to_string()))
            }
            Err(Error::Command(CommandError::NonZeroExit { .. })) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// `Start(req)` (§4.3.3).
    pub async fn start(&self, req: &StartRequest, cancel: &CancellationToken) -> Result<Instance> {
        if req.image_id.trim().is_empty() || req.data_dir.trim().is_empty() {
            return Err(Error::InvalidInput("image_id and data_dir must not be blank".to_string()));
        }
        self.ensure_mount(cancel).await?;
        self.ensure_data_dir_owner(&req.image_id, &req.data_dir, cancel).await?;

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "-p".to_string(),
            "0:5432".to_string(),
            "-v".to_string(),
            self.bind(&req.data_dir, PGDATA_MOUNT, false),
            "-e".to_string(),
            format!("PGDATA={PGDATA_ROOT}"),
            "-e".to_string(),
            "POSTGRES_HOST_AUTH_METHOD=trust".to_string(),
        ];
        for mount in &req.mounts {
            if !mount.is_usable() {
                continue;
            }
            args.push("-v".to_string());
            args.push(self.bind(&mount.host_path, &mount.container_path, mount.read_only));
        }
        if let Some(name) = &req.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        args.push(req.image_id.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        let output = self.run_docker(&args, None, cancel).await?;
        let id = output.combined.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Other("docker run returned an empty container id".to_string()).into());
        }

        if let Err(err) = self.start_inner(&id, req, cancel).await {
            let _ = self.stop(&id, cancel).await;
            return Err(err);
        }

        match self.resolve_published_port(&id, cancel).await {
            Ok(port) => Ok(Instance::new(id, port)),
            Err(err) => {
                let _ = self.stop(&id, cancel).await;
                Err(err)
            }
        }
    }

    async fn start_inner(&self, id: &str, req: &StartRequest, cancel: &CancellationToken) -> Result<()> {
        let probe_path = format!("{PGDATA_ROOT}/PG_VERSION");
        let found = self
            .exec_as(id, None, vec!["test".to_string(), "-f".to_string(), probe_path.clone()], cancel)
            .await
            .is_ok();

        if !found {
            if !req.allow_initdb {
                return Err(RuntimeError::MissingPgVersion {
                    data_dir: req.data_dir.clone(),
                }
                .into());
            }

            let init_result = self
                .exec_as(
                    id,
                    Some("postgres"),
                    vec![
                        "initdb".to_string(),
                        "--username=sqlrs".to_string(),
                        "--auth=trust".to_string(),
                        "--auth-host=trust".to_string(),
                        "--auth-local=trust".to_string(),
                        "-D".to_string(),
                        PGDATA_ROOT.to_string(),
                    ],
                    cancel,
                )
                .await;

            let still_missing = self
                .exec_as(id, None, vec!["test".to_string(), "-f".to_string(), probe_path], cancel)
                .await
                .is_err();

            if still_missing {
                let pgdata_path = format!("{}/pgdata", req.data_dir);
                return Err(match init_result {
                    Ok(_) => RuntimeError::MissingPgVersion {
                        data_dir: req.data_dir.clone(),
                    }
                    .into(),
                    Err(err) => classify_initdb_error(err, &pgdata_path),
                });
            }
        }

        hostauth::ensure_host_auth(Path::new(&req.data_dir)).await?;

        self.exec_as(
            id,
            Some("postgres"),
            vec![
                "pg_ctl".to_string(),
                "-D".to_string(),
                PGDATA_ROOT.to_string(),
                "-o".to_string(),
                "-c listen_addresses=* -p 5432".to_string(),
                "-w".to_string(),
                "start".to_string(),
            ],
            cancel,
        )
        .await?;

        self.wait_for_ready(id, self.config.readiness_timeout, cancel).await
    }

    async fn resolve_published_port(&self, id: &str, cancel: &CancellationToken) -> Result<u16> {
        let out = self
            .run_docker(&["port".to_string(), id.to_string(), "5432/tcp".to_string()], None, cancel)
            .await?;
        path::parse_host_port(&out.combined)
    }

    /// `WaitForReady(id, timeout)` (§4.3.3 step 8): polls `pg_isready` at
    /// 200ms intervals until its output contains "accepting connections".
    pub async fn wait_for_ready(&self, id: &str, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled { program: "pg_isready".to_string() }.into());
            }
            let ready = self
                .exec_as(
                    id,
                    None,
                    vec![
                        "pg_isready".to_string(),
                        "-U".to_string(),
                        "sqlrs".to_string(),
                        "-d".to_string(),
                        "postgres".to_string(),
                        "-h".to_string(),
                        "127.0.0.1".to_string(),
                        "-p".to_string(),
                        "5432".to_string(),
                    ],
                    cancel,
                )
                .await
                .is_ok_and(|out| out.combined.contains("accepting connections"));
            if ready {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RuntimeError::ReadinessTimeout {
                    id: id.to_string(),
                    timeout,
                }
                .into());
            }
            sleep(Duration::from_millis(200)).await;
        }
    }

    /// `Exec(id, req)` (§4.3.4).
    pub async fn exec(&self, id: &str, req: &ExecRequest, cancel: &CancellationToken) -> Result<CommandOutput> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("container id must not be blank".to_string()));
        }
        if req.args.is_empty() {
            return Err(Error::InvalidInput("exec args must not be empty".to_string()));
        }
        let mut args = vec!["exec".to_string()];
        if let Some(user) = &req.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        if let Some(dir) = &req.dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for (k, v) in executor::filter_blank_keys(&req.env) {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        if req.stdin.is_some() {
            args.push("-i".to_string());
        }
        args.push(id.to_string());
        args.extend(req.args.clone());
        self.run_docker(&args, req.stdin.as_deref(), cancel).await
    }

    /// `Stop(id)` (§4.3.5). A blank id is a no-op; output matching
    /// "no such container" or the not-running phrasing is treated as success.
    pub async fn stop(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        if id.trim().is_empty() {
            return Ok(());
        }
        match self
            .run_docker(
                &[
                    "stop".to_string(),
                    "-t".to_string(),
                    self.config.stop_timeout.as_secs().to_string(),
                    id.to_string(),
                ],
                None,
                cancel,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::Command(CommandError::NonZeroExit { output, .. })) if classify::is_docker_not_found(&output) => {
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// `RunContainer(req)`: one-shot, foreground, auto-removed container.
    pub async fn run_container(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<CommandOutput> {
        if req.image_id.trim().is_empty() {
            return Err(Error::InvalidInput("image_id must not be blank".to_string()));
        }
        self.ensure_mount(cancel).await?;

        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if let Some(network) = &req.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        if let Some(user) = &req.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        if let Some(dir) = &req.dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for (k, v) in executor::filter_blank_keys(&req.env) {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        for mount in &req.mounts {
            if !mount.is_usable() {
                continue;
            }
            args.push("-v".to_string());
            args.push(self.bind(&mount.host_path, &mount.container_path, mount.read_only));
        }
        if let Some(name) = &req.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        args.push(req.image_id.clone());
        args.extend(req.args.clone());
        self.run_docker(&args, None, cancel).await
    }
}

/// §4.3.1 step 6 / §4.3.3 step 5 reclassification shared by `InitBase` and
/// `Start`'s in-container initdb path: docker-unavailable passes through
/// unchanged (already classified by [`DockerRuntime::run_docker`]);
/// permission-pattern output becomes the canonical message; everything else
/// bubbles as-is.
fn classify_initdb_error(err: Error, pgdata_path: &str) -> Error {
    match err {
        Error::Command(CommandError::NonZeroExit { output, .. }) => {
            if classify::is_permission_not_supported(&output, pgdata_path) {
                RuntimeError::PermissionNotSupported.into()
            } else {
                RuntimeError::Other(output).into()
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use crate::types::Mount;

    fn runtime(runner: ScriptedRunner) -> DockerRuntime<ScriptedRunner> {
        DockerRuntime::new(runner, None, DockerRuntimeConfig::default())
    }

    #[tokio::test]
    async fn start_success_scenario_s1() {
        let runner = ScriptedRunner::new(vec![
            Ok(String::new()),
            Ok(String::new()),
            Ok(String::new()),
            Ok("container-1\n".to_string()),
            Ok(String::new()),
            Ok(String::new()),
            Ok("accepting connections\n".to_string()),
            Ok("0.0.0.0:54321\n".to_string()),
        ]);
        let rt = runtime(runner);
        let req = StartRequest::new("postgres:17", "/data").with_name("sqlrs-test");
        let instance = rt.start(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(instance.id, "container-1");
        assert_eq!(instance.host, "127.0.0.1");
        assert_eq!(instance.port, 54321);
    }

    #[tokio::test]
    async fn start_missing_pgdata_without_allow_initdb_scenario_s2() {
        let runner = ScriptedRunner::with_exit_codes(vec![
            Ok(String::new()),
            Ok(String::new()),
            Ok(String::new()),
            Ok("container-1\n".to_string()),
            Err((1, String::new())),
        ]);
        let rt = runtime(runner);
        let req = StartRequest::new("postgres:17", "/data");
        let err = rt.start(&req, &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("PG_VERSION"));
    }

    #[tokio::test]
    async fn init_base_skips_initdb_when_pg_version_present_scenario_s3() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("pgdata")).await.unwrap();
        tokio::fs::write(dir.path().join("pgdata").join("PG_VERSION"), "17\n")
            .await
            .unwrap();
        let runner = ScriptedRunner::new(vec![Ok(String::new()), Ok(String::new()), Ok(String::new())]);
        let rt = runtime(runner);
        rt.init_base("postgres:17", &dir.path().display().to_string(), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolve_image_pulls_when_not_found_scenario_s4() {
        let runner = ScriptedRunner::with_exit_codes(vec![
            Err((1, String::new())),
            Ok(String::new()),
            Ok("repo@sha256:resolved\n".to_string()),
        ]);
        let rt = runtime(runner);
        let digest = rt
            .resolve_image("repo:tag", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(digest, "repo@sha256:resolved");
    }

    #[tokio::test]
    async fn resolve_image_returns_input_if_already_a_digest() {
        let rt = runtime(ScriptedRunner::new(vec![]));
        let digest = rt
            .resolve_image("repo@sha256:abc", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(digest, "repo@sha256:abc");
    }

    #[tokio::test]
    async fn stop_of_nonexistent_container_succeeds_scenario_not_found() {
        let runner = ScriptedRunner::with_exit_codes(vec![Err((1, "Error: No such container: abc".to_string()))]);
        let rt = runtime(runner);
        rt.stop("abc", &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn stop_of_blank_id_is_a_noop() {
        let rt = runtime(ScriptedRunner::new(vec![]));
        rt.stop("", &CancellationToken::new()).await.unwrap();
        assert_eq!(rt.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn exec_rejects_blank_args() {
        let rt = runtime(ScriptedRunner::new(vec![]));
        let req = ExecRequest::new(vec![]);
        let err = rt.exec("container-1", &req, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn run_container_drops_unusable_mounts() {
        let runner = ScriptedRunner::new(vec![Ok(String::new())]);
        let rt = runtime(runner);
        let req = RunRequest {
            image_id: "busybox".to_string(),
            args: vec!["true".to_string()],
            mounts: vec![Mount::new("", "/x"), Mount::new("/a", "/b")],
            ..Default::default()
        };
        rt.run_container(&req, &CancellationToken::new()).await.unwrap();
        let calls = rt.runner.calls();
        let (_, args) = &calls[0];
        assert_eq!(args.iter().filter(|a| *a == "-v").count(), 1);
    }
}
