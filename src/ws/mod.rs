//! WebSocket transport: wire protocol, fan-out and connection handler

pub mod fanout;
pub mod handler;
pub mod protocol;
