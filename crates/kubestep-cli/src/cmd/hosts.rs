use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(config_path: &Path, role: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let inventory = config.inventory();
    let hosts = match role {
        Some(role) => inventory.resolve(role),
        None => inventory.hosts().to_vec(),
    };

    if json {
        return print_json(&hosts);
    }

    if hosts.is_empty() {
        match role {
            Some(role) => println!("No hosts with role '{role}'."),
            None => println!("No hosts defined."),
        }
        return Ok(());
    }

    let rows = hosts
        .iter()
        .map(|h| {
            vec![
                h.name.clone(),
                format!("{}@{}:{}", h.user, h.address(), h.port),
                h.roles.join(","),
            ]
        })
        .collect();
    print_table(&["NAME", "ADDRESS", "ROLES"], rows);
    Ok(())
}
