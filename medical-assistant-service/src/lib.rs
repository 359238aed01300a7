pub mod agents;
pub mod config;
pub mod models;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use models::*;
pub use service::{AppState, build_app_state, build_router, create_app};
