//! The network fetch interface the core consumes (spec §6).
//!
//! The core makes no assumption about transport; a concrete implementation
//! (TLS, cookies, proxies, headless-browser fallback) is entirely the
//! caller's concern. `harvest-cli` wires a `reqwest`-backed implementation.

use async_trait::async_trait;

/// The outcome of one attempted network fetch.
#[derive(Debug, Clone)]
pub struct DriverResponse {
    pub http_status: u16,
    pub body: Vec<u8>,
    pub duration_ms: u32,
}

/// Why a fetch did not produce a response.
#[derive(Debug, Clone)]
pub enum DriverError {
    Timeout,
    Transport(String),
}

/// Injected collaborator: performs one outbound fetch. Implementations are
/// expected to attempt the URL once; retry policy belongs to the caller, not
/// the driver or the coordinator (spec §4.4).
#[async_trait]
pub trait Driver: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<DriverResponse, DriverError>;
}
