//! Utility modules for kubernetes-api

pub mod errors;
pub mod logger;
pub mod prereqs;
pub mod progress;
pub mod prompt;

pub use errors::CliError;
pub use logger::{log_error, log_info, log_warn};
pub use prereqs::{CommonPrereqs, Prerequisite};
pub use prompt::confirm;
