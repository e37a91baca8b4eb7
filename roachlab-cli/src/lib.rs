//! roachlab CLI: command surface, handlers, configuration and terminal output

pub mod cli;
pub mod config;
pub mod interactive;
pub mod output;
