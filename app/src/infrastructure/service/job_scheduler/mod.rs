mod field;
pub mod pbs;
mod script;
pub mod slurm;

use std::collections::HashMap;

use anyhow::bail;
use domain::service::SchedulerBackend;

pub use self::{pbs::PbsClient, slurm::SlurmClient};

pub type BackendFactory = fn() -> Box<dyn SchedulerBackend>;

/// Scheduler type names, as written in the configuration, to backend factories.
pub struct SchedulerRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl SchedulerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Every backend compiled into the binary.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("pbspro", || Box::new(PbsClient));
        registry.register("pbs", || Box::new(PbsClient));
        registry.register("slurm", || Box::new(SlurmClient));
        registry
    }

    /// Names are case-insensitive. A later registration replaces an earlier one.
    pub fn register(&mut self, name: &str, factory: BackendFactory) {
        if self.factories.insert(name.to_lowercase(), factory).is_some() {
            tracing::warn!(name, "Scheduler backend registered twice, keeping the last one");
        }
    }

    pub fn create(&self, name: &str) -> anyhow::Result<Box<dyn SchedulerBackend>> {
        let Some(factory) = self.factories.get(&name.to_lowercase()) else {
            let mut known: Vec<_> = self.factories.keys().map(String::as_str).collect();
            known.sort_unstable();
            bail!("Unknown scheduler type `{name}`, expected one of: {}", known.join(", "));
        };
        Ok(factory())
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
