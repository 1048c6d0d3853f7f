pub mod agent;
pub mod backend;
pub mod cli;
pub mod config;
pub mod crew;
pub mod error;
pub mod pipeline;
pub mod profiles;
pub mod provider;
pub mod runner;
pub mod task;
pub mod telemetry;
pub mod tool_policy;
pub mod tools;

#[cfg(test)]
mod tests;
