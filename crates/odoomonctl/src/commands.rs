//! Command implementations for odoomonctl.

use anyhow::{bail, Result};
use console::style;
use odoomon_common::permissions::PermissionStatus;
use odoomon_common::services::ServiceRegistry;
use odoomon_common::{resources, HostSystem, MonitorConfig, PermissionAuditor, ServiceMonitor};
use owo_colors::OwoColorize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn auditor(config: &MonitorConfig) -> PermissionAuditor {
    PermissionAuditor::new(Arc::new(HostSystem::new()), config.identity.clone())
}

fn monitor(config: &MonitorConfig) -> ServiceMonitor {
    ServiceMonitor::new(
        Arc::new(HostSystem::new()),
        ServiceRegistry::from_config(config),
    )
}

fn paint_state(state: &str) -> String {
    match state {
        "active" => state.green().to_string(),
        "failed" | "error" => state.red().to_string(),
        _ => state.yellow().to_string(),
    }
}

fn paint_status(status: PermissionStatus) -> String {
    let word = status.as_str();
    match status {
        PermissionStatus::Ok => word.green().to_string(),
        PermissionStatus::Warning => word.yellow().to_string(),
        _ => word.red().to_string(),
    }
}

pub fn status(config: &MonitorConfig, json: bool) -> Result<()> {
    let statuses = monitor(config).poll_all();

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("{}", style("Services").bold());
    let sorted: BTreeMap<_, _> = statuses.iter().collect();
    for (key, state) in sorted {
        println!("  {:<28} {}", key, paint_state(state));
    }
    Ok(())
}

pub fn modules(config: &MonitorConfig, json: bool) -> Result<()> {
    let auditor = auditor(config);
    let dirs = config.module_directories();

    if dirs.is_empty() {
        bail!("No addon directories configured");
    }

    if json {
        let reports: BTreeMap<String, _> = dirs
            .iter()
            .map(|dir| (dir.display().to_string(), auditor.classify(dir)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("{}", style("Addon directories").bold());
    for dir in &dirs {
        let report = auditor.classify(dir);
        println!(
            "  {:<40} {:<10} mode {}  {}:{}",
            dir.display(),
            paint_status(report.status),
            if report.mode.is_empty() {
                "-"
            } else {
                report.mode.as_str()
            },
            if report.owner.is_empty() {
                "-"
            } else {
                report.owner.as_str()
            },
            if report.group.is_empty() {
                "-"
            } else {
                report.group.as_str()
            },
        );
    }
    Ok(())
}

pub fn audit(config: &MonitorConfig, path: &Path, json: bool) -> Result<()> {
    let report = auditor(config).classify(path);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", style(path.display().to_string()).bold());
    println!("  status:           {}", paint_status(report.status));
    if let Some(error) = &report.error {
        println!("  error:            {}", error);
        return Ok(());
    }
    println!(
        "  owner:            {}:{} (owner {}, group {})",
        report.owner,
        report.group,
        if report.is_owner_match { "match" } else { "MISMATCH" },
        if report.is_group_match { "match" } else { "MISMATCH" },
    );
    println!("  mode:             {}", report.mode);
    println!(
        "  caller access:    read={} write={} exec={}",
        report.readable, report.writable, report.executable
    );
    println!(
        "  group bits:       r={} w={} x={}",
        report.group_readable, report.group_writable, report.group_executable
    );
    println!(
        "  others bits:      r={} w={} x={}",
        report.others_readable, report.others_writable, report.others_executable
    );
    println!("  files consistent: {}", report.files_consistent);
    for file in &report.inconsistent_files {
        println!("    diverging: {}", file);
    }
    Ok(())
}

pub fn fix(config: &MonitorConfig, path: &Path, json: bool) -> Result<()> {
    let outcome = auditor(config).fix(path);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if !outcome.success {
            std::process::exit(1);
        }
        return Ok(());
    }

    if !outcome.success {
        bail!(
            "Fix failed for {}: {}",
            path.display(),
            outcome
                .error
                .unwrap_or_else(|| format!("{} items failed", outcome.failed_count))
        );
    }

    println!(
        "{} {} items fixed, {} failures ({})",
        style("Done:").bold(),
        outcome.fixed_count,
        outcome.failed_count,
        outcome.status.as_str()
    );
    Ok(())
}

pub fn control(config: &MonitorConfig, service: &str, verb: &str) -> Result<()> {
    let monitor = monitor(config);
    let ok = match verb {
        "start" => monitor.start(service),
        "stop" => monitor.stop(service),
        "restart" => monitor.restart(service),
        _ => bail!("Unknown service action: {}", verb),
    };

    if !ok {
        bail!("Failed to {} {}", verb, service);
    }
    println!("{} {} {}", style("OK:").bold(), verb, service);
    Ok(())
}

pub fn resources(json: bool) -> Result<()> {
    let snapshot = resources::collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("{}", style("Resources").bold());
    match snapshot.cpu_percent {
        Some(cpu) => println!("  cpu:   {:.1}% of {} cores", cpu, snapshot.cpu_cores),
        None => println!("  cpu:   n/a ({} cores)", snapshot.cpu_cores),
    }
    if let Some(load) = snapshot.load_avg_1min {
        println!("  load:  {:.2}", load);
    }
    if let Some(memory) = &snapshot.memory {
        println!(
            "  mem:   {} / {} MB ({:.1}%)",
            memory.used_mb, memory.total_mb, memory.percent
        );
    }
    if let Some(disk) = &snapshot.disk {
        println!(
            "  disk:  {} / {} MB ({:.1}%)",
            disk.used_mb, disk.total_mb, disk.percent
        );
    }
    Ok(())
}
