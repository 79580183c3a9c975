use super::{SchedulerBackend, Transport};

/// Everything needed to talk to one compute resource. The transport is not open yet.
pub struct ComputerHandle {
    pub transport: Box<dyn Transport>,
    pub backend: Box<dyn SchedulerBackend>,
    /// Account whose jobs are listed when no job ids are given
    pub username: Option<String>,
}

/// Resolves a computer name to a fresh transport and scheduler backend.
pub trait ComputerProvider: Send + Sync {
    fn computer(&self, name: &str) -> anyhow::Result<ComputerHandle>;
}
