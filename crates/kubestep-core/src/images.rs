use serde::Serialize;

use crate::config::RegistryConfig;
use crate::error::{KubestepError, Result};

/// (component, namespace, repo, tag)
const DEFAULT_IMAGES: &[(&str, &str, &str, &str)] = &[
    ("coredns", "coredns", "coredns", "1.9.3"),
    ("k8s-dns-node-cache", "kubesphere", "k8s-dns-node-cache", "1.22.20"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub registry: String,
    pub namespace: String,
    pub repo: String,
    pub tag: String,
}

impl Image {
    /// Full reference, e.g. `registry.local:5000/kubesphere/k8s-dns-node-cache:1.22.20`.
    pub fn image_name(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.registry.is_empty() {
            parts.push(&self.registry);
        }
        if !self.namespace.is_empty() {
            parts.push(&self.namespace);
        }
        parts.push(&self.repo);
        format!("{}:{}", parts.join("/"), self.tag)
    }
}

/// Maps logical component names to concrete image references, honoring the
/// cluster's private registry settings.
#[derive(Debug, Clone, Default)]
pub struct ImageResolver {
    registry: RegistryConfig,
}

impl ImageResolver {
    pub fn new(registry: RegistryConfig) -> Self {
        Self { registry }
    }

    pub fn image(&self, component: &str) -> Result<Image> {
        let (_, namespace, repo, tag) = DEFAULT_IMAGES
            .iter()
            .find(|(name, ..)| *name == component)
            .ok_or_else(|| KubestepError::Config(format!("unknown image component '{component}'")))?;

        let namespace = if self.registry.namespace_override.is_empty() {
            namespace.to_string()
        } else {
            self.registry.namespace_override.clone()
        };

        Ok(Image {
            registry: self.registry.private_registry.trim_end_matches('/').to_string(),
            namespace,
            repo: repo.to_string(),
            tag: tag.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_omits_prefix() {
        let img = ImageResolver::default().image("k8s-dns-node-cache").unwrap();
        assert_eq!(img.image_name(), "kubesphere/k8s-dns-node-cache:1.22.20");
    }

    #[test]
    fn private_registry_and_namespace_override() {
        let resolver = ImageResolver::new(RegistryConfig {
            private_registry: "registry.local:5000/".into(),
            namespace_override: "mirror".into(),
        });
        assert_eq!(
            resolver.image("coredns").unwrap().image_name(),
            "registry.local:5000/mirror/coredns:1.9.3"
        );
    }

    #[test]
    fn unknown_component_is_config_error() {
        let err = ImageResolver::default().image("etcd-operator").unwrap_err();
        assert!(err.to_string().contains("etcd-operator"));
    }
}
