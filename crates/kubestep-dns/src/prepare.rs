use async_trait::async_trait;
use kubestep_core::{Host, KubestepError, Prepare, Result, Runtime};

use crate::kubectl;

/// Ask the API server whether `kind/name` exists in `kube-system`.
///
/// A `NotFound` answer means absent; any other failure is an error, so an
/// unreachable API server never looks like a missing resource.
pub(crate) async fn resource_exists(
    host: &Host,
    runtime: &Runtime,
    kind: &str,
    name: &str,
) -> Result<bool> {
    let cmd = kubectl(runtime, &format!("get {kind} -n kube-system {name}"));
    let out = runtime.connector().exec(host, &cmd).await?;
    if out.success() {
        return Ok(true);
    }
    let text = out.combined();
    if text.contains("NotFound") {
        Ok(false)
    } else {
        Err(KubestepError::Connector(format!(
            "`{cmd}` exited {}: {}",
            out.exit_code,
            text.trim()
        )))
    }
}

/// True when the `coredns` service is already present.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreDNSExist;

#[async_trait]
impl Prepare for CoreDNSExist {
    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        resource_exists(host, runtime, "svc", "coredns").await
    }
}

/// True when the `nodelocaldns` DaemonSet is already deployed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeLocalDNSExist;

#[async_trait]
impl Prepare for NodeLocalDNSExist {
    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        resource_exists(host, runtime, "ds", "nodelocaldns").await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnableNodeLocalDNS;

#[async_trait]
impl Prepare for EnableNodeLocalDNS {
    async fn evaluate(&self, _host: &Host, runtime: &Runtime) -> Result<bool> {
        Ok(runtime.cluster().kubernetes.enable_nodelocaldns)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeLocalDNSConfigMapNotExist;

#[async_trait]
impl Prepare for NodeLocalDNSConfigMapNotExist {
    async fn evaluate(&self, host: &Host, runtime: &Runtime) -> Result<bool> {
        Ok(!resource_exists(host, runtime, "cm", "nodelocaldns").await?)
    }
}
