mod json;

pub use json::JsonDb;
