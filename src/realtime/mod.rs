//! Realtime task updates over a persistent push connection.

pub mod channel;
pub mod connector;
pub mod frame;

pub use channel::{ConnectionState, RealtimeChannel, Subscription};
#[cfg(feature = "websocket")]
pub use connector::TungsteniteConnector;
pub use connector::{Connector, FrameSource};
pub use frame::parse_frame;
