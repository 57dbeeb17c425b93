pub mod install;
pub mod prereqs;
pub mod services;
