//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::Session;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: Arc<Session>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let session = Session::new(config.session.clone(), config.simulation.clone());

        Self {
            config: Arc::new(config),
            session,
        }
    }
}
