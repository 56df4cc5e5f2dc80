//! Cluster DNS module: pins the CoreDNS service address and, when enabled,
//! deploys the NodeLocal DNS cache.
//!
//! Every task runs on the first master only; re-runs are gated by remote
//! existence checks.

pub mod action;
pub mod prepare;
pub mod templates;

use kubestep_core::inventory::MASTER;
use kubestep_core::prepare::{Not, OnlyFirstMaster};
use kubestep_core::{Data, Module, Result, Runtime, Task, TemplateAction};
use std::path::PathBuf;

use crate::action::{
    ApplyNodeLocalDNSConfigMap, DeployNodeLocalDNS, GenerateNodeLocalDNSConfigMap, OverrideCoreDNS,
};
use crate::prepare::{
    CoreDNSExist, EnableNodeLocalDNS, NodeLocalDNSConfigMapNotExist, NodeLocalDNSExist,
};

pub const MODULE_NAME: &str = "dns";

/// Prefix `args` with the configured kubectl binary.
pub(crate) fn kubectl(runtime: &Runtime, args: &str) -> String {
    format!("{} {args}", runtime.cluster().kubectl)
}

/// Where a rendered manifest lives on the target host.
pub(crate) fn manifest_path(runtime: &Runtime, file: &str) -> PathBuf {
    PathBuf::from(&runtime.cluster().kube_config_dir).join(file)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterDNSModule;

impl Module for ClusterDNSModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn desc(&self) -> &str {
        "Deploy cluster dns"
    }

    fn init(&self, runtime: &Runtime) -> Result<Vec<Task>> {
        let cluster = runtime.cluster();
        let dir = &cluster.kube_config_dir;

        let coredns_svc = templates::coredns_service();
        let generate_coredns_svc = Task::new(
            "GenerateCoreDNSSvc",
            TemplateAction::new(
                coredns_svc.clone(),
                coredns_svc.default_dst(dir),
                Data::new().with("ClusterIP", cluster.coredns_cluster_ip()?),
            ),
        )
        .desc("Generate coredns service")
        .role(MASTER)
        .prepare(OnlyFirstMaster)
        .prepare(Not(CoreDNSExist))
        .parallel(true);

        let override_coredns = Task::new("OverrideCoreDNSService", OverrideCoreDNS)
            .desc("Override coredns service")
            .role(MASTER)
            .prepare(OnlyFirstMaster)
            .prepare(Not(CoreDNSExist))
            .parallel(true);

        let nodelocaldns = templates::nodelocaldns();
        let generate_nodelocaldns = Task::new(
            "GenerateNodeLocalDNS",
            TemplateAction::new(
                nodelocaldns.clone(),
                nodelocaldns.default_dst(dir),
                Data::new()
                    .with(
                        "NodelocaldnsImage",
                        runtime.images().image("k8s-dns-node-cache")?.image_name(),
                    )
                    .with("NodelocaldnsIP", cluster.kubernetes.nodelocaldns_ip.as_str()),
            ),
        )
        .desc("Generate nodelocaldns")
        .role(MASTER)
        .prepare(OnlyFirstMaster)
        .prepare(EnableNodeLocalDNS)
        .prepare(Not(NodeLocalDNSExist))
        .parallel(true);

        let deploy_nodelocaldns = Task::new("DeployNodeLocalDNS", DeployNodeLocalDNS)
            .desc("Deploy nodelocaldns")
            .role(MASTER)
            .prepare(OnlyFirstMaster)
            .prepare(EnableNodeLocalDNS)
            .prepare(Not(NodeLocalDNSExist))
            .parallel(true)
            .retry(5);

        let generate_configmap =
            Task::new("GenerateNodeLocalDNSConfigMap", GenerateNodeLocalDNSConfigMap)
                .desc("Generate nodelocaldns configmap")
                .role(MASTER)
                .prepare(OnlyFirstMaster)
                .prepare(EnableNodeLocalDNS)
                .prepare(NodeLocalDNSConfigMapNotExist)
                .parallel(true);

        let apply_configmap = Task::new("ApplyNodeLocalDNSConfigMap", ApplyNodeLocalDNSConfigMap)
            .desc("Apply nodelocaldns configmap")
            .role(MASTER)
            .prepare(OnlyFirstMaster)
            .prepare(EnableNodeLocalDNS)
            .prepare(NodeLocalDNSConfigMapNotExist)
            .parallel(true)
            .retry(5);

        Ok(vec![
            generate_coredns_svc,
            override_coredns,
            generate_nodelocaldns,
            deploy_nodelocaldns,
            generate_configmap,
            apply_configmap,
        ])
    }
}
