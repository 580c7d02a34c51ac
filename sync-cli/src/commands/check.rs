//! Check-config command - validate a configuration without touching the network.

use anyhow::{Context, Result};
use misync_client::Config;
use misync_core::{ModuleEndpoint, ModuleInterface, ModuleInterfaceSet};
use misync_types::VariableType;
use std::time::Instant;

/// Print what the configuration describes, failing on anything invalid.
pub fn run(config: &Config) -> Result<()> {
    println!("=== misync configuration ===");
    println!();

    let mut modules = ModuleInterfaceSet::new(&config.master.prefix);
    modules
        .set_interface_list(&config.master.modules)
        .context("Invalid module list")?;

    println!("Master:");
    println!("  Address:  {}", config.udp.address);
    println!("  Prefix:   {}", display_or_dash(&config.master.prefix));
    println!(
        "  Transfer: every {} ms",
        config.master.transfer_interval_ms
    );
    println!("  Modules:  {}", modules.len());
    for m in modules.modules() {
        println!(
            "    {:<8} prefix {:<2} at {}",
            m.core().name(),
            m.prefix(),
            m.address()
        );
    }

    if let Some(device) = &config.device {
        let endpoint = ModuleEndpoint::new(
            &device.name,
            &device.settings,
            &device.inputs,
            &device.outputs,
            Instant::now(),
        )
        .context("Invalid device contract")?;
        let core = endpoint.core();
        for (label, set) in [
            ("settings", &core.settings),
            ("inputs", &core.inputs),
            ("outputs", &core.outputs),
        ] {
            if set
                .cells()
                .iter()
                .any(|c| c.variable_type() == VariableType::Unknown)
            {
                anyhow::bail!(
                    "Invalid device contract: unknown type in {} '{}'",
                    label,
                    set.contract_text()
                );
            }
        }
        println!();
        println!("Device:");
        println!("  Name:     {}", core.name());
        println!(
            "  Settings: {} ({})",
            display_or_dash(&core.settings.contract_text()),
            core.settings.contract_id()
        );
        println!(
            "  Inputs:   {} ({})",
            display_or_dash(&core.inputs.contract_text()),
            core.inputs.contract_id()
        );
        println!(
            "  Outputs:  {} ({})",
            display_or_dash(&core.outputs.contract_text()),
            core.outputs.contract_id()
        );
    }

    println!();
    println!("Sinks:");
    match &config.sinks.json {
        Some(json) => println!("  json: {}", json.path.display()),
        None => println!("  json: -"),
    }
    match &config.sinks.log {
        Some(log) => println!("  log:  settings {}", log.settings),
        None => println!("  log:  -"),
    }
    println!();
    println!("OK");
    Ok(())
}

fn display_or_dash(text: &str) -> &str {
    if text.is_empty() {
        "-"
    } else {
        text
    }
}
