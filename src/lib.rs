mod routes;

pub mod app;
pub mod config;
pub mod decoder;
pub mod hub;
pub mod labels;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod worker;

pub use app::start_app;
