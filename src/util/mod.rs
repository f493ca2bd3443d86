pub mod config;
pub mod scenes;
