//! Concrete [`harvest::driver::Driver`] wired to `reqwest`, the teacher's
//! own HTTP client stack (`webfetch/src/browser.rs` uses `reqwest::Method`
//! for its own non-browser requests).
//!
//! This is deliberately narrow: one GET, one timeout, no redir423 policy
//! beyond reqwest's default, no cookies, no proxies — the transport concerns
//! spec.md §1 explicitly pushes onto the caller.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use harvest::driver::{Driver, DriverError, DriverResponse};

pub struct ReqwestDriver {
    client: reqwest::Client,
}

impl ReqwestDriver {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Driver for ReqwestDriver {
    async fn fetch(&self, url: &str) -> Result<DriverResponse, DriverError> {
        let started = Instant::now();
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout
            } else {
                DriverError::Transport(e.to_string())
            }
        })?;

        let http_status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| DriverError::Transport(e.to_string()))?
            .to_vec();
        let duration_ms = started.elapsed().as_millis() as u32;

        Ok(DriverResponse {
            http_status,
            body,
            duration_ms,
        })
    }
}
