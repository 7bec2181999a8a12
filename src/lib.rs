pub mod config;
pub mod fetch;
pub mod output;
pub mod processing;
