pub mod calculation;
pub mod job;

#[rustfmt::skip]
pub use self::{
    calculation::{CalcState, Calculation},
    job::{JobInfo, JobState, MachineInfo},
};
