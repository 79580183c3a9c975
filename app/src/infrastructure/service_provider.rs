use std::collections::HashMap;

use anyhow::{bail, Context};
use domain::service::{ComputerHandle, ComputerProvider, Transport};

use crate::config::ComputerConfig;
use crate::infrastructure::{
    command::{LocalTransport, SshTransport},
    service::job_scheduler::SchedulerRegistry,
};

/// The configured computers, each resolved to a fresh transport and backend on demand.
pub struct Computers {
    computers: HashMap<String, ComputerConfig>,
    registry: SchedulerRegistry,
}

impl Computers {
    /// Fails on duplicate names and unknown scheduler types, before anything is polled.
    pub fn new(configs: &[ComputerConfig], registry: SchedulerRegistry) -> anyhow::Result<Self> {
        let mut computers = HashMap::with_capacity(configs.len());
        for config in configs {
            registry
                .create(&config.scheduler.r#type)
                .with_context(|| format!("Computer `{}`", config.name))?;
            if computers.insert(config.name.clone(), config.clone()).is_some() {
                bail!("Computer `{}` is configured twice", config.name);
            }
        }
        Ok(Self {
            computers,
            registry,
        })
    }
}

impl ComputerProvider for Computers {
    fn computer(&self, name: &str) -> anyhow::Result<ComputerHandle> {
        let config = self
            .computers
            .get(name)
            .with_context(|| format!("Unknown computer `{name}`"))?;

        let transport: Box<dyn Transport> = match &config.ssh_proxy {
            Some(ssh) => Box::new(SshTransport::new(ssh)),
            None => Box::new(LocalTransport::new()),
        };
        Ok(ComputerHandle {
            transport,
            backend: self.registry.create(&config.scheduler.r#type)?,
            username: config.username.clone(),
        })
    }
}
