//! Port reservation lookup: `flowbox ports`.

use anyhow::Result;
use flowbox::flow_ports;

pub fn cmd_ports(flow_id: i64, json: bool) -> Result<()> {
    let ports = flow_ports(flow_id);
    if json {
        println!(
            "{}",
            serde_json::to_string(&serde_json::json!({ "flow_id": flow_id, "ports": ports }))?
        );
    } else {
        for port in ports {
            println!("{}", port);
        }
    }
    Ok(())
}
