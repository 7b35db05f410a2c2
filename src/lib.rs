pub mod acquire;
pub mod config;
pub mod error;
pub mod health;
pub mod install;
pub mod ipc;
pub mod platform;
pub mod supervisor;
pub mod volume;
