use std::path::Path;

use anyhow::{Context, Result};

use gpfleet_core::topology::{GpoTopology, TopologyDocument};
use policy_engine::simulate_computer_rsop;

use super::read_json;

pub fn execute(topology_path: &Path, computer_dn: &str, json: bool) -> Result<()> {
    let document: TopologyDocument = read_json(topology_path)?;
    let topology = GpoTopology::from(document);
    let result = simulate_computer_rsop(computer_dn, &topology);

    if json {
        println!("{}", serde_json::to_string_pretty(&result).context("render RSOP")?);
        return Ok(());
    }

    if result.applied.is_empty() {
        println!("No GPOs apply to {computer_dn}.");
        return Ok(());
    }
    println!("Resultant set of policy for {computer_dn}:");
    for gpo in &result.applied {
        println!(
            "{:>3}. {}{}  (linked at {}, order {})",
            gpo.precedence,
            gpo.gpo_name,
            if gpo.enforced { " [enforced]" } else { "" },
            gpo.link_dn,
            gpo.link_order
        );
    }
    Ok(())
}
