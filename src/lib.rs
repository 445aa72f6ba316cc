pub mod app;
pub mod capture;
pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod hooks;
pub mod messages;
pub mod processing;
pub mod services;
