pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod prompts;
pub mod provider;
pub mod qdrant_store;
pub mod retrieval;
pub mod server;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use server::run_server;
