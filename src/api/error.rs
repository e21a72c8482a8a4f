use thiserror::Error;

/// Errors returned by the REST client.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The server answered with a non-2xx status
  #[error("HTTP error! status: {status}")]
  Http { status: u16 },

  /// The request never got a response
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The body was not the JSON we expected
  #[error("invalid response body: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid endpoint {endpoint}: {source}")]
  Url {
    endpoint: String,
    #[source]
    source: url::ParseError,
  },
}

impl ApiError {
  /// HTTP status code, when the failure came from the server.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status } => Some(*status),
      ApiError::Network(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }
}
