//! Client WebSocket Endpoint
//!
//! axum server exposing `/ws`, where each connection speaks the JSON event
//! protocol handled by [`ClientGateway`](crate::application::services::ClientGateway).

mod server;

pub use server::{WsServer, WsServerError, WsState};
