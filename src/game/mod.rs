//! Session state and the simulated population

pub mod bots;
pub mod motion;
pub mod participant;
pub mod registry;
pub mod scheduler;
pub mod session;

pub use session::Session;
