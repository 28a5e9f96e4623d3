//! Odoomon Common - Shared logic for the Odoo dev-server monitor
//!
//! Permission auditing/repair for addon directories and systemd service
//! status aggregation. The daemon (odoomond) and the CLI (odoomonctl) are
//! thin shells over this crate.

pub mod config;
pub mod error;
pub mod permissions;
pub mod resources;
pub mod services;
pub mod system;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use permissions::{DirPermissionReport, FixOutcome, PermissionAuditor};
pub use services::{ServiceMonitor, ServiceRegistry};
pub use system::{HostSystem, SystemAdapter};
