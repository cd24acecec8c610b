pub mod app;
pub mod config;
pub mod features;
pub mod forest;
pub mod model_service;
pub mod routes;
pub mod server;

pub use app::start_app;
