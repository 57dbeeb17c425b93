pub mod elevate;
pub mod process;
