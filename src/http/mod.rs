//! HTTP surface: health, counts and admin controls

pub mod middleware;
pub mod routes;

pub use routes::build_router;
