pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod schemas;
pub mod services;

pub use app::{ensure_collections, router, AppState};
pub use config::AppConfig;
