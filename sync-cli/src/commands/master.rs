//! Master command - drive the configured modules over UDP.

use anyhow::{Context, Result};
use misync_client::{Config, Master};
use misync_core::ModuleInterface;
use tracing::{debug, info};

use crate::sinks::{JsonFileSink, LogSink};
use crate::udp::UdpLink;

/// Run the master until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let link = UdpLink::bind(&config.udp)
        .await
        .with_context(|| format!("Failed to bind UDP port {}", config.udp.port))?;
    let mut master = Master::new(link, &config.master).context("Invalid module list")?;

    if let Some(json) = &config.sinks.json {
        let sink = JsonFileSink::new(&json.path);
        info!(path = %sink.path().display(), "json sink attached");
        master.add_sink(Box::new(sink))?;
    }
    if let Some(log) = &config.sinks.log {
        master.add_sink(Box::new(LogSink::new(log.settings)))?;
    }
    master.set_unhandled_callback(Box::new(|packet, module| {
        debug!(
            from = %packet.from,
            module = module.map(|m| m.core().name()).unwrap_or("-"),
            bytes = packet.payload.len(),
            "unhandled packet"
        );
    }));

    info!(
        modules = master.modules().len(),
        sinks = master.sink_count(),
        "master running, press Ctrl-C to stop"
    );
    master
        .run_until(super::shutdown_signal())
        .await
        .context("Master stopped")?;
    Ok(())
}
