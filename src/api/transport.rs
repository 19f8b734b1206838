//! Transport seam between the API client and the network.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;
use url::Url;

use super::types::AccountToken;

pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("request to {operation} failed: {message}")]
  Connect {
    operation: &'static str,
    message: String,
  },

  #[error("{operation} responded with HTTP {status}")]
  Status { operation: &'static str, status: u16 },

  #[error("failed to read {operation} response body: {message}")]
  Body {
    operation: &'static str,
    message: String,
  },
}

/// Performs one POST round trip and returns the full response body.
///
/// The token, when present, travels as a header and never inside `body`.
pub trait Transport: Send + Sync {
  fn post(
    &self,
    operation: &'static str,
    body: Vec<u8>,
    token: Option<&AccountToken>,
  ) -> BoxFuture<'static, Result<Vec<u8>, TransportError>>;
}

/// [`Transport`] over HTTP using reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: Url, timeout: Duration) -> color_eyre::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client, base_url })
  }

  /// `{base}/api/{operation}`.
  pub fn operation_url(&self, operation: &str) -> Result<Url, url::ParseError> {
    self.base_url.join(&format!("api/{}", operation))
  }
}

impl Transport for HttpTransport {
  fn post(
    &self,
    operation: &'static str,
    body: Vec<u8>,
    token: Option<&AccountToken>,
  ) -> BoxFuture<'static, Result<Vec<u8>, TransportError>> {
    let url = match self.operation_url(operation) {
      Ok(url) => url,
      Err(e) => {
        let message = e.to_string();
        return async move { Err(TransportError::Connect { operation, message }) }.boxed();
      }
    };

    let mut request = self
      .client
      .post(url)
      .header(CONTENT_TYPE, CONTENT_TYPE_BINARY)
      .body(body);
    if let Some(token) = token {
      request = request.header(AUTHORIZATION, format!("Bearer {}", token.as_str()));
    }

    async move {
      let response = request.send().await.map_err(|e| TransportError::Connect {
        operation,
        message: e.to_string(),
      })?;

      let status = response.status();
      if !status.is_success() {
        return Err(TransportError::Status {
          operation,
          status: status.as_u16(),
        });
      }

      // Read the whole body before decoding; a dropped connection surfaces here.
      let bytes = response.bytes().await.map_err(|e| TransportError::Body {
        operation,
        message: e.to_string(),
      })?;
      Ok(bytes.to_vec())
    }
    .boxed()
  }
}
