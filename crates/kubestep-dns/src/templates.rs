use kubestep_core::Template;

pub fn coredns_service() -> Template {
    Template::new("coredns-svc.yaml", include_str!("templates/coredns-svc.yaml"))
}

pub fn nodelocaldns() -> Template {
    Template::new("nodelocaldns.yaml", include_str!("templates/nodelocaldns.yaml"))
}

pub fn nodelocaldns_configmap() -> Template {
    Template::new(
        "nodelocaldnsConfigmap.yaml",
        include_str!("templates/nodelocaldnsConfigmap.yaml"),
    )
}
