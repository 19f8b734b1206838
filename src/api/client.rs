use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::Codec;

use super::operations::Operation;
use super::transport::Transport;
use super::types::AccountToken;

/// Issues one network round trip per operation call.
///
/// Every failure (transport, HTTP status, truncated body, decode) collapses
/// into `None`; the cause is only logged. No retries happen here.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self { transport }
  }

  pub async fn call<O: Operation>(
    &self,
    request: &O::Request,
    token: Option<&AccountToken>,
  ) -> Option<O::Response> {
    let body = request.to_bytes();
    debug!(operation = O::NAME, bytes = body.len(), "api request");

    let response = match self.transport.post(O::NAME, body, token).await {
      Ok(response) => response,
      Err(e) => {
        warn!(operation = O::NAME, error = %e, "api call failed");
        return None;
      }
    };

    match O::Response::from_bytes(&response) {
      Ok(value) => {
        debug!(operation = O::NAME, bytes = response.len(), "api response");
        Some(value)
      }
      Err(e) => {
        warn!(
          operation = O::NAME,
          offset = e.offset(),
          error = %e,
          "failed to decode api response"
        );
        None
      }
    }
  }
}
