//! Invitation-token and session core of the charter booking backend.

pub mod accounts;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod invitation;
pub mod profile;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
