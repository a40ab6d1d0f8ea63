//! Model provider access with retry, failover and health tracking.

mod failover;
mod health;

pub use failover::{GatewayRequest, GatewayResponse, ProviderGateway, ProviderTarget};
pub use health::ProviderHealth;
