pub mod cli;
pub mod config;
pub mod embed;
pub mod logging;
pub mod output;
