pub mod job;

pub use self::job::JobTemplate;
