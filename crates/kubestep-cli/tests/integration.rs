#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const HOSTS: &str = r#"
hosts:
  - name: master1
    address: 10.0.0.1
    roles: [master, etcd]
  - name: master2
    address: 10.0.0.2
    roles: [master]
  - name: worker1
    address: 10.0.0.3
    roles: [worker]
"#;

fn write_config(dir: &TempDir, extra: &str) {
    std::fs::write(dir.path().join("kubestep.yaml"), format!("{HOSTS}{extra}")).unwrap();
}

fn kubestep(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kubestep").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("KUBESTEP_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

/// A kubectl stand-in for a fresh cluster: every lookup is NotFound, the
/// coredns clusterIP query answers, everything else succeeds.
const FRESH_KUBECTL: &str = r#"
case "$*" in
  *jsonpath*) echo 10.233.0.3 ;;
  get*) echo "Error from server (NotFound): $2 \"$5\" not found" >&2; exit 1 ;;
esac
"#;

/// Config for the local connector with kubectl replaced by `kubectl` and
/// manifests written under `manifests`.
fn local_config(kubectl: &str, manifests: &Path) -> String {
    format!(
        "cluster:\n  kubectl: \"{kubectl}\"\n  kube_config_dir: \"{}\"\n",
        manifests.display()
    )
}

// ---------------------------------------------------------------------------
// kubestep hosts
// ---------------------------------------------------------------------------

#[test]
fn hosts_lists_inventory() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "");
    kubestep(&dir)
        .arg("hosts")
        .assert()
        .success()
        .stdout(predicate::str::contains("master1"))
        .stdout(predicate::str::contains("root@10.0.0.3:22"));
}

#[test]
fn hosts_filters_by_role_in_declaration_order() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "");
    let hosts = stdout_json(kubestep(&dir).args(["hosts", "--role", "master", "--json"]));
    let names: Vec<&str> = hosts
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["master1", "master2"]);
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().unwrap();
    kubestep(&dir)
        .arg("hosts")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn config_flag_and_env_select_file() {
    let dir = TempDir::new().unwrap();
    let other = dir.path().join("cluster-a.yaml");
    std::fs::write(&other, HOSTS).unwrap();
    kubestep(&dir)
        .args(["hosts", "--config"])
        .arg(&other)
        .assert()
        .success();
    kubestep(&dir)
        .env("KUBESTEP_CONFIG", &other)
        .arg("hosts")
        .assert()
        .success()
        .stdout(predicate::str::contains("worker1"));
}

// ---------------------------------------------------------------------------
// kubestep config validate
// ---------------------------------------------------------------------------

#[test]
fn validate_clean_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "");
    kubestep(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn validate_reports_errors_and_fails() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "  - name: master1\n    roles: [master]\nexecutor:\n  forks: 0\n",
    );
    kubestep(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] duplicate host name 'master1'"))
        .stdout(predicate::str::contains("forks"));
}

// ---------------------------------------------------------------------------
// kubestep plan
// ---------------------------------------------------------------------------

#[test]
fn plan_lists_dns_tasks_without_running() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "");
    let plans = stdout_json(kubestep(&dir).args(["plan", "--json"]));
    let tasks: Vec<&str> = plans[0]["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(tasks.len(), 6);
    assert_eq!(tasks[0], "GenerateCoreDNSSvc");
    assert_eq!(plans[0]["tasks"][3]["retry"], 5);
}

#[test]
fn unknown_module_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "");
    kubestep(&dir)
        .args(["run", "--dry-run", "--module", "storage"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown module 'storage'"));
}

// ---------------------------------------------------------------------------
// kubestep run
// ---------------------------------------------------------------------------

#[test]
fn dry_run_records_without_touching_hosts() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "");
    let report = stdout_json(kubestep(&dir).args(["run", "--dry-run", "--json"]));

    let tasks = report["modules"][0]["tasks"].as_array().unwrap();
    let status = |name: &str| {
        tasks
            .iter()
            .find(|t| t["task"] == name)
            .map(|t| t["status"].as_str().unwrap().to_string())
            .unwrap()
    };
    // Every `kubectl get` succeeds in a dry run, so each resource looks
    // deployed already and every gate skips.
    assert_eq!(status("GenerateCoreDNSSvc"), "skipped");
    assert_eq!(status("DeployNodeLocalDNS"), "skipped");
    assert_eq!(status("ApplyNodeLocalDNSConfigMap"), "skipped");

    let commands = report["dry_run"]["commands"].as_array().unwrap();
    assert!(commands.iter().all(|c| c["host"] == "master1"));
    assert!(commands
        .iter()
        .any(|c| c["command"] == "/usr/local/bin/kubectl get ds -n kube-system nodelocaldns"));
    assert!(report["dry_run"]["uploads"].as_array().unwrap().is_empty());
    assert!(report["run_id"].is_string());
}

#[test]
fn dry_run_connector_from_config() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "connector:\n  type: dry_run\n");
    kubestep(&dir)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("DeployNodeLocalDNS"))
        .stdout(predicate::str::contains("dry run:"));
}

#[test]
fn local_run_writes_manifests() {
    let dir = TempDir::new().unwrap();
    let manifests = dir.path().join("manifests");
    let script = dir.path().join("kubectl.sh");
    std::fs::write(&script, FRESH_KUBECTL).unwrap();
    let kubectl = format!("sh {}", script.display());
    write_config(&dir, &local_config(&kubectl, &manifests));

    kubestep(&dir).arg("run").assert().success();

    let ds = std::fs::read_to_string(manifests.join("nodelocaldns.yaml")).unwrap();
    assert!(ds.contains("image: kubesphere/k8s-dns-node-cache:1.22.20"));
    let svc = std::fs::read_to_string(manifests.join("coredns-svc.yaml")).unwrap();
    assert!(svc.contains("clusterIP: 10.233.0.3"));
    assert!(manifests.join("nodelocaldnsConfigmap.yaml").exists());
}

#[test]
fn local_run_on_converged_cluster_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let manifests = dir.path().join("manifests");
    write_config(&dir, &local_config("echo", &manifests));

    let report = stdout_json(kubestep(&dir).args(["run", "--json"]));
    let tasks = report["modules"][0]["tasks"].as_array().unwrap();
    assert!(tasks.iter().all(|t| t["status"] == "skipped"));
    assert!(!manifests.exists());
}

#[test]
fn failing_prepare_fails_run_and_reports_task() {
    let dir = TempDir::new().unwrap();
    let manifests = dir.path().join("manifests");
    write_config(&dir, &local_config("false", &manifests));

    kubestep(&dir)
        .arg("run")
        .assert()
        .failure()
        .stdout(predicate::str::contains("not_started"))
        .stderr(predicate::str::contains("GenerateCoreDNSSvc"))
        .stderr(predicate::str::contains("master1"));
    assert!(!manifests.exists());
}

#[test]
fn failed_run_json_carries_run_report() {
    let dir = TempDir::new().unwrap();
    let manifests = dir.path().join("manifests");
    write_config(&dir, &local_config("false", &manifests));

    let out = kubestep(&dir)
        .args(["run", "--json"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(body["kind"], "prepare_evaluation");
    assert_eq!(body["hosts"][0], "master1");
    assert!(body["report"]["run_id"].is_string());
    assert_eq!(body["report"]["modules"][0]["module"], "dns");
    assert_eq!(body["report"]["modules"][0]["tasks"][1]["status"], "not_started");
}
