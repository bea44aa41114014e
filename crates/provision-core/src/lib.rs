pub mod actions;
pub mod config;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod io;
pub mod paths;
pub mod report;
pub mod runner;
pub mod settings;
pub mod stage;
pub mod template;

pub use error::{ProvisionError, Result};
