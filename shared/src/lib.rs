//! Re-exports the shared utilities consumed by the benchmark services,
//! allowing them to pull in configuration handling, error types, database
//! helpers, the provider registry and the chat-completion client from a
//! single crate.

pub mod config;
pub mod db;
pub mod dto;
pub mod error;
pub mod llm;
pub mod providers;
