//! Device command - run one module endpoint over UDP.
//!
//! Useful for trying a master without hardware.

use anyhow::{Context, Result};
use misync_client::{Config, Device};
use tracing::info;

use crate::store::FileStore;
use crate::udp::UdpLink;

/// Run the device described by `[device]` until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let device_config = config
        .device
        .as_ref()
        .context("No [device] section in the configuration")?;

    let link = UdpLink::bind(&config.udp)
        .await
        .with_context(|| format!("Failed to bind UDP port {}", config.udp.port))?;
    let mut device = Device::from_config(link, device_config).context("Invalid contracts")?;

    if let Some(path) = &device_config.snapshot {
        let store = FileStore::open(path, device_config.snapshot_size)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        device = device
            .with_snapshot(Box::new(store))
            .context("Failed to restore settings")?;
    }

    info!(
        name = %device_config.name,
        address = %config.udp.address,
        "device running, press Ctrl-C to stop"
    );
    device
        .run_until(super::shutdown_signal())
        .await
        .context("Device stopped")?;
    Ok(())
}
