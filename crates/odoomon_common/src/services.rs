//! Service registry and status aggregation.
//!
//! Logical service keys map to systemd units; multi-instance families
//! (e.g. PostgreSQL clusters) fan out into `{unit}@{instance}` units with
//! instances discovered at poll time. Every poll rebuilds the status map
//! from live state.

use crate::config::{MonitorConfig, ServiceEntry};
use crate::system::SystemAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Derived status key → state word (active/inactive/failed/...)
pub type ServiceStatusMap = HashMap<String, String>;

/// Immutable snapshot of the configured logical services.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    entries: Vec<ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        Self { entries }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.services.clone())
    }

    pub fn entries(&self) -> &[ServiceEntry] {
        &self.entries
    }

    /// Resolve a logical key or a derived `{key}_{instance}` status key to
    /// a concrete unit name. Pure over the registry snapshot.
    pub fn resolve(&self, key: &str) -> Option<String> {
        for entry in &self.entries {
            if !entry.multi_instance && entry.key == key {
                return Some(entry.unit.clone());
            }
        }

        for entry in &self.entries {
            if !entry.multi_instance {
                continue;
            }
            let prefix = format!("{}_", entry.key);
            if let Some(instance) = key.strip_prefix(prefix.as_str()) {
                if !instance.is_empty() {
                    return Some(format!("{}@{}", entry.unit, instance));
                }
            }
        }

        None
    }

    /// Instance suffixes for a family: configured instances unioned with
    /// whatever is currently registered with systemd. Discovery failure
    /// degrades to the configured list.
    pub fn instances(&self, entry: &ServiceEntry, system: &dyn SystemAdapter) -> Vec<String> {
        let mut instances = entry.instances.clone();

        if entry.auto_discover {
            let pattern = format!("{}@*", entry.unit);
            match system.list_units(&pattern) {
                Ok(units) => {
                    for unit in units {
                        if let Some(instance) = parse_instance(&unit, &entry.unit) {
                            if !instances.contains(&instance) {
                                instances.push(instance);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Instance discovery failed for {}, using configured list: {}",
                        entry.key, e
                    );
                }
            }
        }

        instances
    }
}

/// Extract the instance suffix from a unit name like
/// `postgresql@14-main.service`.
fn parse_instance(unit: &str, prefix: &str) -> Option<String> {
    let name = unit.strip_suffix(".service").unwrap_or(unit);
    let instance = name.strip_prefix(prefix)?.strip_prefix('@')?;
    if instance.is_empty() {
        None
    } else {
        Some(instance.to_string())
    }
}

/// Polls and controls the registered services.
pub struct ServiceMonitor {
    system: Arc<dyn SystemAdapter>,
    registry: ServiceRegistry,
}

impl ServiceMonitor {
    pub fn new(system: Arc<dyn SystemAdapter>, registry: ServiceRegistry) -> Self {
        Self { system, registry }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Query every configured service. Plain entries contribute one key;
    /// families contribute one key per instance. A failed query yields
    /// the state "error" for that key only.
    pub fn poll_all(&self) -> ServiceStatusMap {
        let mut statuses = ServiceStatusMap::new();

        for entry in self.registry.entries() {
            if !entry.multi_instance {
                let state = self.query_state(&entry.unit);
                statuses.insert(entry.key.clone(), state);
                continue;
            }

            for instance in self.registry.instances(entry, self.system.as_ref()) {
                let unit = format!("{}@{}", entry.unit, instance);
                let state = self.query_state(&unit);
                statuses.insert(format!("{}_{}", entry.key, instance), state);
            }
        }

        statuses
    }

    /// State of one unit: fast `is-active` probe first, falling back to
    /// the `Active:` line of the full status output for a finer word.
    fn query_state(&self, unit: &str) -> String {
        let state = match self.system.unit_active_state(unit) {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to query state of {}: {}", unit, e);
                return "error".to_string();
            }
        };

        if state == "active" {
            return state;
        }

        match self.system.unit_status_output(unit) {
            Ok(output) => parse_active_line(&output).unwrap_or(state),
            Err(e) => {
                debug!("No detailed status for {}: {}", unit, e);
                state
            }
        }
    }

    pub fn start(&self, key: &str) -> bool {
        self.control(key, "start")
    }

    pub fn stop(&self, key: &str) -> bool {
        self.control(key, "stop")
    }

    pub fn restart(&self, key: &str) -> bool {
        self.control(key, "restart")
    }

    fn control(&self, key: &str, verb: &str) -> bool {
        let Some(unit) = self.registry.resolve(key) else {
            warn!("Unknown service key: {}", key);
            return false;
        };

        info!("Running systemctl {} {}", verb, unit);
        let outcome = self.system.run_privileged(&["systemctl", verb, &unit]);
        if !outcome.success {
            warn!("systemctl {} {} failed: {}", verb, unit, outcome.detail);
        }
        outcome.success
    }
}

/// Pull the state word out of a `systemctl status` dump, e.g.
/// "Active: activating (start) since ..." → "activating".
fn parse_active_line(output: &str) -> Option<String> {
    let line = output
        .lines()
        .find(|line| line.trim_start().starts_with("Active:"))?;
    let value = line.split_once(':')?.1.trim();
    let word = value
        .split_whitespace()
        .next()?
        .trim_matches(|c| c == '(' || c == ')');
    if word.is_empty() {
        None
    } else {
        Some(word.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::testing::FakeSystem;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(vec![
            ServiceEntry {
                key: "odoo".to_string(),
                unit: "odoo".to_string(),
                multi_instance: false,
                instances: vec![],
                auto_discover: false,
            },
            ServiceEntry {
                key: "postgres".to_string(),
                unit: "postgresql".to_string(),
                multi_instance: true,
                instances: vec!["14-main".to_string()],
                auto_discover: true,
            },
        ])
    }

    fn monitor(fake: FakeSystem) -> (ServiceMonitor, Arc<FakeSystem>) {
        let fake = Arc::new(fake);
        let monitor = ServiceMonitor::new(fake.clone(), registry());
        (monitor, fake)
    }

    #[test]
    fn test_resolve_plain_and_family_keys() {
        let registry = registry();
        assert_eq!(registry.resolve("odoo"), Some("odoo".to_string()));
        assert_eq!(
            registry.resolve("postgres_14-main"),
            Some("postgresql@14-main".to_string())
        );
        assert_eq!(registry.resolve("postgres_"), None);
        assert_eq!(registry.resolve("nginx"), None);
    }

    #[test]
    fn test_parse_instance() {
        assert_eq!(
            parse_instance("postgresql@14-main.service", "postgresql"),
            Some("14-main".to_string())
        );
        assert_eq!(
            parse_instance("postgresql@15-main", "postgresql"),
            Some("15-main".to_string())
        );
        assert_eq!(parse_instance("postgresql.service", "postgresql"), None);
        assert_eq!(parse_instance("mysql@prod.service", "postgresql"), None);
        assert_eq!(parse_instance("postgresql@.service", "postgresql"), None);
    }

    #[test]
    fn test_poll_all_expands_instances_without_duplicates() {
        let mut fake = FakeSystem::default();
        // 14-main is both configured and discovered; 15-main only discovered
        fake.discovered_units = Some(vec![
            "postgresql@14-main.service".to_string(),
            "postgresql@15-main.service".to_string(),
        ]);
        fake.active_states
            .insert("odoo".to_string(), "active".to_string());
        fake.active_states
            .insert("postgresql@14-main".to_string(), "active".to_string());
        fake.active_states
            .insert("postgresql@15-main".to_string(), "active".to_string());

        let (monitor, _) = monitor(fake);
        let statuses = monitor.poll_all();

        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses["odoo"], "active");
        assert_eq!(statuses["postgres_14-main"], "active");
        assert_eq!(statuses["postgres_15-main"], "active");
        // No bare family key
        assert!(!statuses.contains_key("postgres"));
    }

    #[test]
    fn test_poll_falls_back_to_status_detail() {
        let mut fake = FakeSystem::default();
        fake.active_states
            .insert("odoo".to_string(), "inactive".to_string());
        fake.status_outputs.insert(
            "odoo".to_string(),
            "* odoo.service - Odoo\n   Loaded: loaded\n   Active: activating (start) since Mon\n"
                .to_string(),
        );

        let (monitor, _) = monitor(fake);
        let statuses = monitor.poll_all();
        assert_eq!(statuses["odoo"], "activating");
    }

    #[test]
    fn test_poll_keeps_probe_word_without_detail() {
        let mut fake = FakeSystem::default();
        fake.active_states
            .insert("odoo".to_string(), "failed".to_string());
        // No status output configured; the probe word stands

        let (monitor, _) = monitor(fake);
        let statuses = monitor.poll_all();
        assert_eq!(statuses["odoo"], "failed");
    }

    #[test]
    fn test_poll_isolates_query_failures() {
        let mut fake = FakeSystem::default();
        fake.fail_active.insert("odoo".to_string());
        fake.active_states
            .insert("postgresql@14-main".to_string(), "active".to_string());

        let (monitor, _) = monitor(fake);
        let statuses = monitor.poll_all();

        assert_eq!(statuses["odoo"], "error");
        assert_eq!(statuses["postgres_14-main"], "active");
    }

    #[test]
    fn test_discovery_failure_degrades_to_configured() {
        let mut fake = FakeSystem::default();
        fake.discovered_units = None;
        fake.active_states
            .insert("postgresql@14-main".to_string(), "active".to_string());

        let (monitor, _) = monitor(fake);
        let statuses = monitor.poll_all();

        assert_eq!(statuses["postgres_14-main"], "active");
        assert!(!statuses.contains_key("postgres_15-main"));
    }

    #[test]
    fn test_control_resolves_and_runs_systemctl() {
        let (monitor, fake) = monitor(FakeSystem::default());

        assert!(monitor.restart("postgres_14-main"));
        let commands = fake.recorded();
        assert_eq!(
            commands[0],
            vec!["systemctl", "restart", "postgresql@14-main"]
        );

        assert!(monitor.start("odoo"));
        assert!(!monitor.stop("unknown"));
        // Unknown key never reaches systemctl
        assert_eq!(fake.recorded().len(), 2);
    }

    #[test]
    fn test_control_reports_command_failure() {
        let mut fake = FakeSystem::default();
        fake.fail_privileged_matching = Some("odoo".to_string());
        let (monitor, _) = monitor(fake);
        assert!(!monitor.start("odoo"));
    }

    #[test]
    fn test_parse_active_line() {
        let output = "   Loaded: loaded (/lib/systemd/system/x.service)\n   Active: failed (Result: exit-code) since Tue\n";
        assert_eq!(parse_active_line(output), Some("failed".to_string()));
        assert_eq!(parse_active_line("no such line"), None);
    }
}
