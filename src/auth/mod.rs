use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod expiry;
pub(crate) mod extractors;
pub mod handlers;
pub mod repo;
pub mod services;

pub use extractors::AuthUser;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
