pub mod job;
pub mod scheduler;

pub mod prelude {
    #[rustfmt::skip]
    pub use super::{
        job::ExecutionManager,
        scheduler::{build_run_line, Scheduler},
    };
}
