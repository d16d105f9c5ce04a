pub mod config;
pub mod context;
pub mod defaults;
pub mod env;
pub mod error;
pub mod hooks;
pub mod paths;
pub mod plugin;
pub mod process;
pub mod runner;
pub mod upgrade;

pub use error::{Error, ErrorCode, Result};
