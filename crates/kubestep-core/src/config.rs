use crate::error::{KubestepError, Result};
use crate::inventory::{Host, Inventory, MASTER};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_CONFIG_FILE: &str = "kubestep.yaml";

static HOST_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn host_name_re() -> &'static Regex {
    HOST_NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9.-]*[a-z0-9])?$").unwrap())
}

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// NetworkConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_service_cidr")]
    pub kube_service_cidr: String,
    #[serde(default = "default_pods_cidr")]
    pub kube_pods_cidr: String,
}

fn default_service_cidr() -> String {
    "10.233.0.0/18".to_string()
}

fn default_pods_cidr() -> String {
    "10.233.64.0/18".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            kube_service_cidr: default_service_cidr(),
            kube_pods_cidr: default_pods_cidr(),
        }
    }
}

// ---------------------------------------------------------------------------
// KubernetesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_dns_domain")]
    pub dns_domain: String,
    #[serde(default = "default_true")]
    pub enable_nodelocaldns: bool,
    #[serde(default = "default_nodelocaldns_ip")]
    pub nodelocaldns_ip: String,
}

fn default_dns_domain() -> String {
    "cluster.local".to_string()
}

fn default_true() -> bool {
    true
}

fn default_nodelocaldns_ip() -> String {
    "169.254.25.10".to_string()
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            dns_domain: default_dns_domain(),
            enable_nodelocaldns: true,
            nodelocaldns_ip: default_nodelocaldns_ip(),
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub private_registry: String,
    #[serde(default)]
    pub namespace_override: String,
}

// ---------------------------------------------------------------------------
// ClusterConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Directory generated manifests are delivered to on each host.
    #[serde(default = "default_kube_config_dir")]
    pub kube_config_dir: String,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
}

fn default_kube_config_dir() -> String {
    "/etc/kubernetes".to_string()
}

fn default_kubectl() -> String {
    "/usr/local/bin/kubectl".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            kubernetes: KubernetesConfig::default(),
            registry: RegistryConfig::default(),
            kube_config_dir: default_kube_config_dir(),
            kubectl: default_kubectl(),
        }
    }
}

impl ClusterConfig {
    /// ClusterIP of the `kubernetes` API service: first address of the
    /// service CIDR.
    pub fn kubernetes_cluster_ip(&self) -> Result<String> {
        nth_service_ip(&self.network.kube_service_cidr, 1)
    }

    /// ClusterIP reserved for CoreDNS: third address of the service CIDR.
    pub fn coredns_cluster_ip(&self) -> Result<String> {
        nth_service_ip(&self.network.kube_service_cidr, 3)
    }
}

fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u32)> {
    let invalid = || KubestepError::Config(format!("invalid CIDR '{cidr}'"));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid())?;
    let prefix: u32 = prefix.trim().parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    Ok((addr, prefix))
}

fn nth_service_ip(cidr: &str, n: u32) -> Result<String> {
    let (addr, prefix) = parse_cidr(cidr)?;
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(addr) & mask;
    let size = if prefix == 0 { u32::MAX } else { !mask };
    if n >= size {
        return Err(KubestepError::Config(format!(
            "CIDR '{cidr}' has no address at offset {n}"
        )));
    }
    Ok(Ipv4Addr::from(network + n).to_string())
}

// ---------------------------------------------------------------------------
// ConnectorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    #[default]
    Local,
    Ssh,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default, rename = "type")]
    pub kind: ConnectorKind,
    /// Prefix remote commands with `sudo -E`.
    #[serde(default)]
    pub sudo: bool,
    /// Per-command deadline. `0` waits indefinitely.
    #[serde(default)]
    pub command_timeout_secs: u64,
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    #[serde(default)]
    pub ssh_options: Vec<String>,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            kind: ConnectorKind::Local,
            sudo: false,
            command_timeout_secs: 0,
            ssh_binary: default_ssh_binary(),
            ssh_options: Vec::new(),
        }
    }
}

impl ConnectorConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.command_timeout_secs))
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running hosts inside a parallel task.
    #[serde(default = "default_forks")]
    pub forks: usize,
    /// Pause between attempts on the same host. `0` retries immediately.
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_forks() -> usize {
    10
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            forks: default_forks(),
            retry_delay_ms: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn retry_delay(&self) -> Option<Duration> {
        if self.retry_delay_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.retry_delay_ms))
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KubestepError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn inventory(&self) -> Inventory {
        Inventory::new(self.hosts.clone())
    }

    /// Check the config for problems. `Error`-level warnings mean a run would
    /// fail or target the wrong hosts.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        if self.hosts.is_empty() {
            push(WarnLevel::Error, "no hosts defined".to_string());
        }

        let mut seen = HashSet::new();
        for host in &self.hosts {
            if !seen.insert(host.name.as_str()) {
                push(
                    WarnLevel::Error,
                    format!("duplicate host name '{}'", host.name),
                );
            }
            if !host_name_re().is_match(&host.name) {
                push(
                    WarnLevel::Warning,
                    format!(
                        "host name '{}' is not a valid DNS-1123 name; kubernetes will reject it",
                        host.name
                    ),
                );
            }
            if host.roles.is_empty() {
                push(
                    WarnLevel::Warning,
                    format!("host '{}' has no roles and will never be targeted", host.name),
                );
            }
        }

        if !self.hosts.is_empty() && !self.hosts.iter().any(|h| h.has_role(MASTER)) {
            push(
                WarnLevel::Warning,
                "no host carries the 'master' role; master tasks will be no-ops".to_string(),
            );
        }

        if let Err(e) = self.cluster.coredns_cluster_ip() {
            push(WarnLevel::Error, format!("network.kube_service_cidr: {e}"));
        }

        if self.executor.forks == 0 {
            push(
                WarnLevel::Error,
                "executor.forks must be at least 1".to_string(),
            );
        } else if self.executor.forks > Semaphore::MAX_PERMITS {
            push(
                WarnLevel::Error,
                format!(
                    "executor.forks must be at most {}",
                    Semaphore::MAX_PERMITS
                ),
            );
        }

        warnings
    }
}
