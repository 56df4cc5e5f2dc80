use async_trait::async_trait;
use kubestep_core::io::shell_quote;
use kubestep_core::{Action, Data, Host, KubestepError, Result, Runtime, TemplateAction};
use tracing::{debug, info};

use crate::{kubectl, manifest_path, templates};

async fn apply_manifest(host: &Host, runtime: &Runtime, file: &str) -> Result<()> {
    let path = manifest_path(runtime, file);
    let cmd = kubectl(
        runtime,
        &format!("apply -f {}", shell_quote(&path.to_string_lossy())),
    );
    runtime
        .connector()
        .run(host, &cmd)
        .await
        .map_err(|e| KubestepError::action(&host.name, e))?;
    info!(host = %host.name, manifest = %path.display(), "manifest applied");
    Ok(())
}

/// Replaces the kubeadm `kube-dns` service with the `coredns` one rendered
/// by `GenerateCoreDNSSvc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideCoreDNS;

#[async_trait]
impl Action for OverrideCoreDNS {
    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()> {
        let delete = kubectl(runtime, "delete -n kube-system svc kube-dns");
        let out = runtime
            .connector()
            .exec(host, &delete)
            .await
            .map_err(|e| KubestepError::action(&host.name, e))?;
        if !out.success() {
            let text = out.combined();
            if !text.contains("NotFound") {
                return Err(KubestepError::action(
                    &host.name,
                    format!("delete kube-dns service: {}", text.trim()),
                ));
            }
            debug!(host = %host.name, "kube-dns service already absent");
        }
        apply_manifest(host, runtime, templates::coredns_service().name()).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployNodeLocalDNS;

#[async_trait]
impl Action for DeployNodeLocalDNS {
    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()> {
        apply_manifest(host, runtime, templates::nodelocaldns().name()).await
    }
}

/// Renders the NodeLocal DNS Corefile, forwarding the cluster domain to the
/// live `coredns` service address.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateNodeLocalDNSConfigMap;

#[async_trait]
impl Action for GenerateNodeLocalDNSConfigMap {
    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()> {
        let cmd = kubectl(
            runtime,
            "get svc -n kube-system coredns -o jsonpath='{.spec.clusterIP}'",
        );
        let cluster_ip = runtime
            .connector()
            .run(host, &cmd)
            .await
            .map_err(|e| KubestepError::action(&host.name, e))?;
        let cluster_ip = cluster_ip.trim();
        if cluster_ip.is_empty() {
            return Err(KubestepError::action(
                &host.name,
                "coredns service has no cluster IP",
            ));
        }

        let k8s = &runtime.cluster().kubernetes;
        let template = templates::nodelocaldns_configmap();
        let dst = manifest_path(runtime, template.name());
        let data = Data::new()
            .with("ForwardTarget", cluster_ip)
            .with("DNSDomain", k8s.dns_domain.as_str())
            .with("NodelocaldnsIP", k8s.nodelocaldns_ip.as_str());
        TemplateAction::new(template, dst, data)
            .execute(host, runtime)
            .await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyNodeLocalDNSConfigMap;

#[async_trait]
impl Action for ApplyNodeLocalDNSConfigMap {
    async fn execute(&self, host: &Host, runtime: &Runtime) -> Result<()> {
        apply_manifest(host, runtime, templates::nodelocaldns_configmap().name()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubestep_core::config::ClusterConfig;
    use kubestep_core::connector::{CommandOutput, RecordingConnector};
    use kubestep_core::Inventory;
    use std::sync::Arc;

    fn setup() -> (Arc<RecordingConnector>, Runtime, Host) {
        let conn = Arc::new(RecordingConnector::new());
        let host = Host::new("master1").with_role("master");
        let rt = Runtime::new(
            Inventory::new(vec![host.clone()]),
            conn.clone(),
            ClusterConfig::default(),
        );
        (conn, rt, host)
    }

    fn commands(conn: &RecordingConnector) -> Vec<String> {
        conn.execs().into_iter().map(|e| e.command).collect()
    }

    #[tokio::test]
    async fn override_tolerates_missing_kube_dns() {
        let (conn, rt, host) = setup();
        conn.respond(
            "/usr/local/bin/kubectl delete",
            CommandOutput::failed(1, "Error from server (NotFound): services \"kube-dns\" not found"),
        );
        OverrideCoreDNS.execute(&host, &rt).await.unwrap();
        assert_eq!(
            commands(&conn),
            vec![
                "/usr/local/bin/kubectl delete -n kube-system svc kube-dns",
                "/usr/local/bin/kubectl apply -f /etc/kubernetes/coredns-svc.yaml",
            ]
        );
    }

    #[tokio::test]
    async fn override_fails_on_other_delete_errors() {
        let (conn, rt, host) = setup();
        conn.respond(
            "/usr/local/bin/kubectl delete",
            CommandOutput::failed(1, "Unauthorized"),
        );
        let err = OverrideCoreDNS.execute(&host, &rt).await.unwrap_err();
        assert!(matches!(err, KubestepError::Action { .. }));
        assert_eq!(commands(&conn).len(), 1);
    }

    #[tokio::test]
    async fn configmap_forwards_to_live_cluster_ip() {
        let (conn, rt, host) = setup();
        conn.respond(
            "/usr/local/bin/kubectl get svc -n kube-system coredns -o jsonpath",
            CommandOutput::ok("10.233.0.3\n"),
        );
        GenerateNodeLocalDNSConfigMap.execute(&host, &rt).await.unwrap();
        let written = conn
            .file("master1", "/etc/kubernetes/nodelocaldnsConfigmap.yaml")
            .unwrap();
        let text = String::from_utf8(written).unwrap();
        assert!(text.contains("forward . 10.233.0.3 {"), "{text}");
        assert!(text.contains("cluster.local:53"), "{text}");
    }

    #[tokio::test]
    async fn configmap_without_cluster_ip_fails() {
        let (conn, rt, host) = setup();
        let err = GenerateNodeLocalDNSConfigMap
            .execute(&host, &rt)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no cluster IP"), "{err}");
        assert!(conn.uploads().is_empty());
    }

    #[tokio::test]
    async fn apply_failure_is_action_error() {
        let (conn, rt, host) = setup();
        conn.respond("/usr/local/bin/kubectl apply", CommandOutput::failed(1, "timeout"));
        let err = DeployNodeLocalDNS.execute(&host, &rt).await.unwrap_err();
        assert!(matches!(err, KubestepError::Action { .. }));
    }
}
