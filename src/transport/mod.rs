//! Agent transport: frame envelope, `WebSocket` session registry, and the
//! reliable inbound/outbound delivery layers.

pub mod frame;
pub mod inbound;
pub mod outbound;
pub mod registry;
