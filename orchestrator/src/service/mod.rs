pub mod critical_path;
pub mod deployment;
pub mod federation;
pub mod monitor;
