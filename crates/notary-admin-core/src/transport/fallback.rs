//! Ordered fallback across authorised transports.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Request, Response, StatusCode};
use tracing::debug;

use super::{RoundTripper, TransportError};

/// What to do after candidate `current` answered with `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    /// Hand the response back to the caller.
    Return,
    /// Retry the same request on the candidate at this index.
    TryNext(usize),
}

impl FallbackState {
    /// Only an unauthorised answer moves on, and only while candidates remain.
    pub fn after(current: usize, candidates: usize, status: StatusCode) -> Self {
        if status == StatusCode::UNAUTHORIZED && current + 1 < candidates {
            FallbackState::TryNext(current + 1)
        } else {
            FallbackState::Return
        }
    }
}

/// Sends each request to the first candidate, falling back to the next one
/// whenever the server answers `401 Unauthorized`.
///
/// Transport errors are returned immediately. When every candidate is
/// rejected the last response is returned.
pub struct FallbackTransport {
    candidates: Vec<Arc<dyn RoundTripper>>,
}

impl FallbackTransport {
    pub fn new(candidates: Vec<Arc<dyn RoundTripper>>) -> Result<Self, TransportError> {
        if candidates.is_empty() {
            return Err(TransportError::NoCandidates);
        }
        Ok(Self { candidates })
    }
}

#[async_trait]
impl RoundTripper for FallbackTransport {
    async fn round_trip(&self, request: Request) -> Result<Response, TransportError> {
        let mut current = 0;
        loop {
            let candidate = self
                .candidates
                .get(current)
                .ok_or(TransportError::NoCandidates)?;
            // Streaming bodies cannot be replayed.
            let Some(attempt) = request.try_clone() else {
                return candidate.round_trip(request).await;
            };
            let response = candidate.round_trip(attempt).await?;
            match FallbackState::after(current, self.candidates.len(), response.status()) {
                FallbackState::Return => return Ok(response),
                FallbackState::TryNext(next) => {
                    debug!(url = %request.url(), candidate = next, "unauthorized, trying next transport");
                    current = next;
                }
            }
        }
    }
}
