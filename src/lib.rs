pub mod commands;
pub mod error;
pub mod helpers;
pub mod utils;

pub use error::{DeployError, Result};
