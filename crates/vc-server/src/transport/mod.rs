//! Viewer-facing transports.

pub mod websocket;
