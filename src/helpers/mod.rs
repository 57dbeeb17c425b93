pub mod app_config;
pub mod choco;
pub mod config;
pub mod console;
pub mod envfile;
pub mod git;
pub mod path;
pub mod postgres;
pub mod prompt;
pub mod runner;
