// src/lib.rs

pub mod auth;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;

// Re-export specific items for convenience if needed
pub use coordinator::Coordinator;
pub use routes::create_router;
