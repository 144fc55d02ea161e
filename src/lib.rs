//! Conversational assistant for a markdown note vault.
//!
//! VaultMind turns chat messages into tool calls: "read my daily notes",
//! "summarize it", "search for tokio" or "help me create a note". Each message
//! goes through a natural-language pipeline:
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Intent classification | [`nlp::classifier`] | [`nlp::IntentResult`] |
//! | Parameter extraction and inference | [`nlp::extractor`], [`nlp::inference`] | [`nlp::ParameterResult`] |
//! | Context, fuzzy matching, clarification | [`nlp::enhanced`] | [`nlp::EnhancedProcessingResult`] |
//! | Tool scoring | [`selection`] | [`selection::ToolSelection`] |
//! | Execution | [`tools`] | [`tools::ToolResult`] |
//! | Reply | [`response`] | [`response::GeneratedResponse`] |
//!
//! Multi-turn work (guided note creation, topic research) runs through the
//! [`flow`] state machine. [`agent::EnhancedChatAgent`] ties it together.
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML and environment variables
//! - [`db`]: SQLite initialization, schema, and migrations
//! - [`history`]: conversation log
//! - [`profile`]: learned per-user preferences
//! - [`vault`], [`llm`], [`search`]: collaborators the tools call

pub mod agent;
pub mod config;
pub mod db;
pub mod flow;
pub mod history;
pub mod llm;
pub mod nlp;
pub mod profile;
pub mod response;
pub mod search;
pub mod selection;
pub mod tools;
pub mod vault;
