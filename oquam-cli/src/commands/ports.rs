//! `list-ports` command.

use console::style;
use oquam::{CandidateDevice, DiscoveryConfig, detect_ports, format_port_list, order_candidates};

/// JSON view of one candidate.
pub(crate) fn port_json(port: &CandidateDevice, discovery: &DiscoveryConfig) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "description": port.description,
        "hwid": port.hwid,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "likely": port.matches_any(&discovery.keywords),
        "skipped": port.description_matches_any(&discovery.skip_markers),
        "preferred": discovery.preferred.as_deref() == Some(port.name.as_str()),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports in the order discovery would probe them.
pub(crate) fn cmd_list_ports(discovery: &DiscoveryConfig, json: bool) {
    let ports = order_candidates(detect_ports(), discovery);

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| port_json(p, discovery))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports (probe order):").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for (port, line) in ports.iter().zip(format_port_list(&ports)) {
        let marker = match probe_marker(port, discovery) {
            "skip" => style("skip").dim(),
            "likely" => style("likely").green(),
            other => style(other).yellow(),
        };
        eprintln!("  {} {:<6} {}", style("•").green(), marker, line);
    }
}

/// How discovery treats a port: `skip`, `likely` or `other`.
pub(crate) fn probe_marker(port: &CandidateDevice, discovery: &DiscoveryConfig) -> &'static str {
    if port.description_matches_any(&discovery.skip_markers) {
        "skip"
    } else if port.matches_any(&discovery.keywords) {
        "likely"
    } else {
        "other"
    }
}
