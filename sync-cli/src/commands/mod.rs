//! CLI command implementations.

pub mod check;
pub mod device;
pub mod master;

/// Resolves when the process is asked to stop (Ctrl-C).
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
