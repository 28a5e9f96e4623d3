//! Odoomon Daemon - Odoo dev server monitor
//!
//! Periodically polls service status, audits addon directory permissions
//! and logs a resource summary.

use anyhow::Result;
use odoomon_common::permissions::PermissionStatus;
use odoomon_common::services::ServiceRegistry;
use odoomon_common::{resources, HostSystem, MonitorConfig, PermissionAuditor, ServiceMonitor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Odoomon daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = MonitorConfig::load(None)?;
    let system = Arc::new(HostSystem::new());
    let auditor = PermissionAuditor::new(system.clone(), config.identity.clone());
    let monitor = ServiceMonitor::new(system, ServiceRegistry::from_config(&config));

    let interval = Duration::from_secs(config.daemon.poll_interval_secs.max(1));
    info!("Polling every {}s", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => run_tick(&config, &auditor, &monitor),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down gracefully");
    Ok(())
}

fn run_tick(config: &MonitorConfig, auditor: &PermissionAuditor, monitor: &ServiceMonitor) {
    let statuses = monitor.poll_all();
    for (key, state) in &statuses {
        if state != "active" {
            warn!("Service {} is {}", key, state);
        }
    }
    info!("Polled {} service targets", statuses.len());

    for dir in config.module_directories() {
        let report = auditor.classify(&dir);
        match report.status {
            PermissionStatus::Ok => {}
            status => warn!(
                "Addon directory {} status: {}",
                dir.display(),
                status.as_str()
            ),
        }
    }

    let snapshot = resources::collect();
    info!(
        "Resources: cpu {} load {} mem {}",
        snapshot
            .cpu_percent
            .map(|c| format!("{:.1}%", c))
            .unwrap_or_else(|| "n/a".to_string()),
        snapshot
            .load_avg_1min
            .map(|l| format!("{:.2}", l))
            .unwrap_or_else(|| "n/a".to_string()),
        snapshot
            .memory
            .as_ref()
            .map(|m| format!("{:.1}%", m.percent))
            .unwrap_or_else(|| "n/a".to_string()),
    );
}
