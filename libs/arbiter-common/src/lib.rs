pub mod config;
pub mod passk;
pub mod types;
