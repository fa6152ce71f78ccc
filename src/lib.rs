pub mod api;
pub mod callback;
pub mod config;
pub mod executor;
pub mod humanize;
pub mod observability;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod task;
