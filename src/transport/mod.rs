//! Chat transport
//!
//! A persistent WebSocket link to the agent backend:
//! - JSON framing of outbound user messages and inbound agent frames
//! - Supervisor task that reconnects according to a `ReconnectPolicy`
//! - Connection state and events observable through channels

pub mod client;
pub mod connector;
pub mod messages;
pub mod reconnect;

pub use client::{ChatTransport, ConnectionState, TransportClient, TransportEvent};
pub use connector::{Connector, FrameSink, FrameStream, WsConnector};
pub use messages::{InboundFrame, OutboundFrame};
pub use reconnect::ReconnectPolicy;
