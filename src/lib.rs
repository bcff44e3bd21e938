pub mod analytics;
pub mod app;
pub mod challenge_day;
pub mod client;
pub mod config;
pub mod dates;
pub mod digest;
pub mod envelopes;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod practice;
pub mod progress;
pub mod selection;
pub mod state;
pub mod storage;

pub use app::router;
pub use config::Config;
pub use state::AppState;
pub use storage::load_data;
