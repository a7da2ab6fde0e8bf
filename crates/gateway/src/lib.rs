//! pushkeeper gateway: delivery runtime, gateway connections, HTTP front
//! door and CLI for the legacy binary push protocol.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod connections;
pub mod runtime;
pub mod state;
