mod computer;
mod job_scheduler;
pub mod transport;

#[rustfmt::skip]
pub use self::{
    computer::{ComputerHandle, ComputerProvider},
    job_scheduler::SchedulerBackend,
    transport::{escape_for_shell, CommandOutput, Transport},
};
