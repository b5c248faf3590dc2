//! HTTP and WebSocket handlers for the relay service.

pub mod health;
pub mod ws;
