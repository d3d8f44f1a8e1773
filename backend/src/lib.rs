pub mod config;
pub mod errors;
pub mod model;
pub mod routes;
pub mod scoring;
pub mod storage;

pub use config::ServiceConfig;
pub use errors::ApiError;
pub use routes::configure_routes;
pub use scoring::ScoringService;
pub use storage::ResultStore;
