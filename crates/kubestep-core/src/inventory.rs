//! Host inventory and role resolution.
//!
//! The inventory is built once from configuration and shared read-only
//! (`Arc<Inventory>`) for the whole run. Every lookup preserves declaration
//! order so that "first master" is deterministic across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KubestepError, Result};

pub const MASTER: &str = "master";
pub const WORKER: &str = "worker";
pub const ETCD: &str = "etcd";

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    pub name: String,
    /// Address used by connectors. Defaults to `name` when omitted.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            port: default_port(),
            user: default_user(),
            private_key: None,
            roles: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        let role = role.into();
        if !self.has_role(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<Host>,
}

impl Inventory {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// All hosts carrying `role`, in declaration order. May be empty.
    pub fn resolve(&self, role: &str) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|h| h.has_role(role))
            .cloned()
            .collect()
    }

    /// Like [`resolve`](Self::resolve) but an empty result is an error.
    pub fn require(&self, role: &str) -> Result<Vec<Host>> {
        let hosts = self.resolve(role);
        if hosts.is_empty() {
            return Err(KubestepError::HostResolution(role.to_string()));
        }
        Ok(hosts)
    }

    /// The first host declared with `role`.
    pub fn first_of(&self, role: &str) -> Result<&Host> {
        self.hosts
            .iter()
            .find(|h| h.has_role(role))
            .ok_or_else(|| KubestepError::HostResolution(role.to_string()))
    }

    /// Distinct role labels in first-seen order.
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        for host in &self.hosts {
            for role in &host.roles {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }
        roles
    }
}

// ---------------------------------------------------------------------------
// HostSelector
// ---------------------------------------------------------------------------

/// How a task picks its target hosts. Role selectors are resolved lazily,
/// when the task is about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSelector {
    Role(String),
    Hosts(Vec<Host>),
}

impl HostSelector {
    pub fn role(role: impl Into<String>) -> Self {
        HostSelector::Role(role.into())
    }

    pub fn resolve(&self, inventory: &Inventory) -> Vec<Host> {
        match self {
            HostSelector::Role(role) => inventory.resolve(role),
            HostSelector::Hosts(hosts) => hosts.clone(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            HostSelector::Role(role) => format!("role:{role}"),
            HostSelector::Hosts(hosts) => {
                let names: Vec<&str> = hosts.iter().map(|h| h.name.as_str()).collect();
                format!("hosts:{}", names.join(","))
            }
        }
    }
}
