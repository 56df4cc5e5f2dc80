//! Transports used by prepares and actions to reach a host.
//!
//! A [`Connector`] runs shell commands on a host and uploads files to it.
//! The engine itself never calls a connector; it only hands one to prepares
//! and actions through the [`Runtime`](crate::runtime::Runtime).
//!
//! Three implementations ship with the crate:
//!
//! - [`LocalConnector`]: runs everything on the machine kubestep runs on.
//! - [`SshConnector`]: shells out to the `ssh` binary.
//! - [`RecordingConnector`]: in-memory, records every call and answers with
//!   scripted responses. Backs `--dry-run` and the test suites.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{ConnectorConfig, ConnectorKind};
use crate::error::{KubestepError, Result};
use crate::inventory::Host;
use crate::io::{atomic_write, expand_home, shell_quote};

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for error messages.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `command` through a shell on `host`. A non-zero exit status is
    /// reported in the output, not as an error; `Err` means the command could
    /// not be run at all.
    async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput>;

    /// Write `content` to `dst` on `host`, creating parent directories.
    async fn upload(&self, host: &Host, content: &[u8], dst: &Path) -> Result<()>;

    /// Run `command` and return its stdout, turning a non-zero exit status
    /// into a [`KubestepError::Connector`] that carries the command output.
    async fn run(&self, host: &Host, command: &str) -> Result<String> {
        let out = self.exec(host, command).await?;
        if !out.success() {
            return Err(KubestepError::Connector(format!(
                "`{command}` on '{}' exited with code {}: {}",
                host.name,
                out.exit_code,
                out.combined().trim()
            )));
        }
        Ok(out.stdout)
    }
}

/// Build the connector selected by `config`.
pub fn from_config(config: &ConnectorConfig) -> Result<Box<dyn Connector>> {
    Ok(match config.kind {
        ConnectorKind::Local => Box::new(LocalConnector::from_config(config)),
        ConnectorKind::Ssh => Box::new(SshConnector::from_config(config)?),
        ConnectorKind::DryRun => Box::new(RecordingConnector::new()),
    })
}

fn with_sudo(sudo: bool, command: &str) -> String {
    if sudo {
        format!("sudo -E /bin/bash -c {}", shell_quote(command))
    } else {
        command.to_string()
    }
}

async fn output_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
    what: &str,
) -> Result<CommandOutput> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| KubestepError::Connector(format!("failed to spawn {what}: {e}")))?;

    if let Some(data) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(data)
                .await
                .map_err(|e| KubestepError::Connector(format!("failed to write stdin: {e}")))?;
            // dropping the pipe closes stdin so the remote `cat` terminates
        }
    }

    let wait = child.wait_with_output();
    let output = match timeout {
        None => wait.await?,
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
            KubestepError::Connector(format!("{what} timed out after {}s", limit.as_secs()))
        })??,
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

// ---------------------------------------------------------------------------
// LocalConnector
// ---------------------------------------------------------------------------

/// Runs commands on the local machine regardless of the target host. Useful
/// for single-node clusters and for running kubestep on the first master.
#[derive(Debug, Clone, Default)]
pub struct LocalConnector {
    sudo: bool,
    timeout: Option<Duration>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            sudo: config.sudo,
            timeout: config.command_timeout(),
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput> {
        let command = with_sudo(self.sudo, command);
        debug!(host = %host.name, %command, "local exec");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        output_with_timeout(cmd, None, self.timeout, "sh").await
    }

    async fn upload(&self, host: &Host, content: &[u8], dst: &Path) -> Result<()> {
        debug!(host = %host.name, dst = %dst.display(), bytes = content.len(), "local upload");
        let dst = dst.to_path_buf();
        let data = content.to_vec();
        tokio::task::spawn_blocking(move || atomic_write(&dst, &data))
            .await
            .map_err(|e| KubestepError::Connector(format!("upload task panicked: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// SshConnector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SshConnector {
    binary: String,
    options: Vec<String>,
    sudo: bool,
    timeout: Option<Duration>,
}

impl SshConnector {
    /// Fails when the ssh binary cannot be found on `PATH`.
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        which::which(&config.ssh_binary).map_err(|_| {
            KubestepError::Connector(format!("ssh binary '{}' not found", config.ssh_binary))
        })?;
        Ok(Self {
            binary: config.ssh_binary.clone(),
            options: config.ssh_options.clone(),
            sudo: config.sudo,
            timeout: config.command_timeout(),
        })
    }

    fn args(&self, host: &Host) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-p".to_string(),
            host.port.to_string(),
        ];
        if let Some(key) = &host.private_key {
            args.push("-i".to_string());
            args.push(expand_home(key).to_string_lossy().into_owned());
        }
        args.extend(self.options.iter().cloned());
        args.push(format!("{}@{}", host.user, host.address()));
        args
    }

    fn command(&self, host: &Host, remote: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.args(host)).arg(remote);
        cmd
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput> {
        let remote = with_sudo(self.sudo, command);
        debug!(host = %host.name, command = %remote, "ssh exec");
        output_with_timeout(self.command(host, &remote), None, self.timeout, "ssh").await
    }

    async fn upload(&self, host: &Host, content: &[u8], dst: &Path) -> Result<()> {
        let dst_str = dst.to_string_lossy();
        let dir = dst
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let tmp = format!("{dst_str}.kubestep-tmp");
        let script = format!(
            "mkdir -p {dir} && cat > {tmp} && mv -f {tmp} {dst}",
            dir = shell_quote(&dir),
            tmp = shell_quote(&tmp),
            dst = shell_quote(&dst_str),
        );
        let remote = with_sudo(self.sudo, &script);
        debug!(host = %host.name, dst = %dst_str, bytes = content.len(), "ssh upload");
        let out =
            output_with_timeout(self.command(host, &remote), Some(content), self.timeout, "ssh")
                .await?;
        if !out.success() {
            return Err(KubestepError::Connector(format!(
                "upload to '{}' exited with code {}: {}",
                host.name,
                out.exit_code,
                out.combined().trim()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingConnector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecRecord {
    pub host: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    pub host: String,
    pub dst: String,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    Error(String),
}

/// In-memory connector. Every command succeeds with empty output unless a
/// response was scripted for a matching command prefix; the most recently
/// scripted matching prefix wins.
#[derive(Debug, Default)]
pub struct RecordingConnector {
    execs: Mutex<Vec<ExecRecord>>,
    uploads: Mutex<Vec<UploadRecord>>,
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    responses: Mutex<Vec<(String, Scripted)>>,
    failing_uploads: Mutex<Vec<String>>,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn respond(&self, prefix: impl Into<String>, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.into(), Scripted::Output(output)));
    }

    /// Make commands starting with `prefix` fail to run at all.
    pub fn fail(&self, prefix: impl Into<String>, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push((prefix.into(), Scripted::Error(message.into())));
    }

    /// Make uploads whose destination starts with `prefix` fail.
    pub fn fail_uploads(&self, prefix: impl Into<String>) {
        self.failing_uploads.lock().unwrap().push(prefix.into());
    }

    pub fn execs(&self) -> Vec<ExecRecord> {
        self.execs.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn file(&self, host: &str, dst: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(host.to_string(), dst.to_string()))
            .cloned()
    }

    fn scripted(&self, command: &str) -> Option<Scripted> {
        self.responses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, s)| s.clone())
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn exec(&self, host: &Host, command: &str) -> Result<CommandOutput> {
        debug!(host = %host.name, %command, "dry-run exec");
        self.execs.lock().unwrap().push(ExecRecord {
            host: host.name.clone(),
            command: command.to_string(),
        });
        match self.scripted(command) {
            Some(Scripted::Output(out)) => Ok(out),
            Some(Scripted::Error(msg)) => Err(KubestepError::Connector(msg)),
            None => Ok(CommandOutput::default()),
        }
    }

    async fn upload(&self, host: &Host, content: &[u8], dst: &Path) -> Result<()> {
        let dst = dst.to_string_lossy().into_owned();
        debug!(host = %host.name, %dst, bytes = content.len(), "dry-run upload");
        let failing = self
            .failing_uploads
            .lock()
            .unwrap()
            .iter()
            .any(|p| dst.starts_with(p.as_str()));
        if failing {
            return Err(KubestepError::Connector(format!(
                "upload to '{dst}' rejected"
            )));
        }
        self.uploads.lock().unwrap().push(UploadRecord {
            host: host.name.clone(),
            dst: dst.clone(),
            bytes: content.len(),
        });
        self.files
            .lock()
            .unwrap()
            .insert((host.name.clone(), dst), content.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sudo_wraps_and_quotes() {
        assert_eq!(with_sudo(false, "ls -l"), "ls -l");
        assert_eq!(
            with_sudo(true, "kubectl get svc"),
            "sudo -E /bin/bash -c 'kubectl get svc'"
        );
    }

    #[test]
    fn combined_output_prefers_available_streams() {
        assert_eq!(CommandOutput::ok("out").combined(), "out");
        assert_eq!(CommandOutput::failed(1, "err").combined(), "err");
        let both = CommandOutput {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 1,
        };
        assert_eq!(both.combined(), "out\nerr");
    }

    #[tokio::test]
    async fn local_exec_reports_exit_code() {
        let conn = LocalConnector::new();
        let host = Host::new("localhost");
        let out = conn.exec(&host, "echo hi").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hi");

        let out = conn.exec(&host, "echo oops >&2; exit 3").await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn run_turns_non_zero_exit_into_error() {
        let conn = LocalConnector::new();
        let err = conn
            .run(&Host::new("localhost"), "echo NotFound >&2; exit 1")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NotFound"), "{msg}");
        assert!(msg.contains("code 1"), "{msg}");
    }

    #[tokio::test]
    async fn local_timeout_is_enforced() {
        let conn = LocalConnector {
            sudo: false,
            timeout: Some(Duration::from_millis(100)),
        };
        let err = conn
            .exec(&Host::new("localhost"), "sleep 5")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[tokio::test]
    async fn local_upload_writes_file() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("kube/coredns-svc.yaml");
        LocalConnector::new()
            .upload(&Host::new("localhost"), b"kind: Service\n", &dst)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "kind: Service\n");
    }

    #[tokio::test]
    async fn recording_connector_scripts_by_prefix() {
        let conn = RecordingConnector::new();
        let host = Host::new("node1");
        conn.respond("kubectl get", CommandOutput::failed(1, "NotFound"));
        conn.respond("kubectl get cm", CommandOutput::ok("found"));
        conn.fail("kubectl delete", "connection reset");

        let out = conn.exec(&host, "kubectl get svc coredns").await.unwrap();
        assert_eq!(out.exit_code, 1);
        let out = conn.exec(&host, "kubectl get cm nodelocaldns").await.unwrap();
        assert_eq!(out.stdout, "found");
        assert!(conn.exec(&host, "kubectl delete svc x").await.is_err());
        let out = conn.exec(&host, "uname").await.unwrap();
        assert!(out.success());

        assert_eq!(conn.execs().len(), 4);
        assert_eq!(conn.execs()[0].host, "node1");
    }

    #[tokio::test]
    async fn recording_connector_keeps_uploaded_bytes() {
        let conn = RecordingConnector::new();
        let host = Host::new("node1");
        conn.upload(&host, b"abc", Path::new("/etc/kubernetes/a.yaml"))
            .await
            .unwrap();
        assert_eq!(conn.file("node1", "/etc/kubernetes/a.yaml").unwrap(), b"abc");
        assert_eq!(conn.uploads()[0].bytes, 3);

        conn.fail_uploads("/etc/kubernetes/b");
        assert!(conn
            .upload(&host, b"x", Path::new("/etc/kubernetes/b.yaml"))
            .await
            .is_err());
        assert_eq!(conn.uploads().len(), 1);
    }

    #[test]
    fn from_config_builds_requested_kind() {
        let mut cfg = ConnectorConfig::default();
        assert_eq!(from_config(&cfg).unwrap().name(), "local");
        cfg.kind = ConnectorKind::DryRun;
        assert_eq!(from_config(&cfg).unwrap().name(), "dry-run");
        cfg.kind = ConnectorKind::Ssh;
        cfg.ssh_binary = "definitely-not-an-ssh-binary".into();
        assert!(from_config(&cfg).is_err());
    }
}
