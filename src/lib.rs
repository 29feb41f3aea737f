pub mod approval;
pub mod chat;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod doctor;
pub mod error;
pub mod generation;
pub mod memory;
pub mod mission;
pub mod profiles;
pub mod roles;
pub mod server;
pub mod streaming;
pub mod telemetry;
pub mod tool_policy;
pub mod tools;

#[cfg(test)]
mod tests;
