#![forbid(unsafe_code)]

pub mod api;
pub mod certificate;
pub mod command;
pub mod config;
pub mod errors;
pub mod manifest;
pub mod models;
pub mod persist;
pub mod process;
pub mod readiness;
pub mod registry;
pub mod verify;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
