pub mod command;
pub mod database;
pub mod service;
pub mod service_provider;
