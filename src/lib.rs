pub mod api;
pub mod collaborators;
pub mod config;
pub mod crawler;
pub mod handlers;
pub mod humanize;
pub mod messaging; // Sinks are public for embedding and tests (MemorySink)
pub mod observability;
pub mod tasks;
