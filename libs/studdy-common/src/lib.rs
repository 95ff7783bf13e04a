pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod gamification;
pub mod judge;
pub mod llm;
pub mod retry;
pub mod service;
pub mod srs;
pub mod store;
pub mod types;

#[cfg(test)]
mod service_tests;
