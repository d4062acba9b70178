pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod jobs;
pub mod notify;
pub mod observability;
pub mod publisher;
pub mod refresh;
pub mod worker;
