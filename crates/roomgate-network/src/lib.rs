//! Socket surface of the room gateway.
//!
//! One TCP listener, one task per connection, typed messages in both
//! directions. See [`server`] for the connection lifecycle.

pub mod server;

pub use server::{GatewayEvent, GatewayEventKind, SocketServer, SocketServerConfig};
