pub mod abstractions;
pub mod analysis;
pub mod config;
pub mod error;
