//! The concurrent service engines (§4.4-§4.7): WebSocket, SSE, reverse
//! proxy, and range-serving media. Each is an independent object consuming
//! the routing fabric and filesystem adapter; none know about each other.

pub mod media;
pub mod proxy;
pub mod sse;
pub mod websocket;
