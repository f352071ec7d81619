//! Port listing command implementation.

use {
    crate::serial::{available_ports, describe_port},
    anyhow::Result,
    console::style,
    rust_i18n::t,
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = available_ports();

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "wefly_adapter": p.is_wefly_adapter(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style(t!("list_ports.header")).bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style(t!("list_ports.no_ports")).dim());
        return Ok(());
    }

    for port in &ports {
        eprintln!("  {} {}", style("•").green(), describe_port(port));
    }

    let mut adapters = ports.iter().filter(|p| p.is_wefly_adapter());
    if let (Some(only), None) = (adapters.next(), adapters.next()) {
        eprintln!(
            "\n{} {}",
            style("→").green().bold(),
            t!(
                "list_ports.auto_detected",
                port = style(&only.name).cyan().bold().to_string()
            )
        );
    }

    Ok(())
}
