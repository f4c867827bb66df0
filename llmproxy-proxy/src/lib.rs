pub mod config;
pub mod error_response;
pub mod grounding;
pub mod models;
pub mod pipeline;
pub mod router;
pub mod state;

pub use config::Config;
pub use router::build_router;
pub use state::AppState;
