//! Upstream exchange connectivity: WebSocket streaming client,
//! REST snapshot client, and the standalone RFC 6455 handshake primitive.

pub mod handshake;
pub mod rest_client;
pub mod ws_client;

pub use rest_client::{RestClient, RestClientConfig};
pub use ws_client::{ExchangeClient, ExchangeClientConfig, ExchangeClientStats, StreamKind};
