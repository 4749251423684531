use log::debug;
use thiserror::Error;

use crate::toggle::Toggle;

/// Errors returned by a [Fetcher].
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be made or the server rejected it.
    #[error("failed to fetch toggles: {0}")]
    Transport(String),
    /// The response body was not a toggle list.
    #[error("invalid toggle payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// The server answered without a usable payload.
    #[error("toggle payload unavailable")]
    Unavailable,
}

/// A fetched toggle payload together with its freshness marker.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApiResponse {
    /// The `Last-Modified` value the payload was served with, passed back on the next fetch.
    pub last_modified: Option<String>,
    pub payload: Vec<Toggle>,
}

impl ApiResponse {
    pub fn new(last_modified: Option<String>, payload: Vec<Toggle>) -> Self {
        ApiResponse {
            last_modified,
            payload,
        }
    }

    /// Decode a JSON toggle array as served by the toggle endpoint.
    ///
    /// Unknown fields are ignored and individual malformed conditions are kept as
    /// [crate::Condition::Malformed], but a body that is not an array of named toggles is an error.
    pub fn from_json(body: &str, last_modified: Option<String>) -> Result<Self, FetchError> {
        let payload: Vec<Toggle> = serde_json::from_str(body)?;
        debug!(
            "Decoded {} toggles, last modified {:?}",
            payload.len(),
            last_modified
        );
        Ok(ApiResponse::new(last_modified, payload))
    }

    /// The names of all toggles in payload order.
    pub fn toggle_names(&self) -> Vec<String> {
        self.payload.iter().map(|t| t.name.clone()).collect()
    }
}

/// Loads the toggle payload for an SDK key.
///
/// `last_modified` is the marker of the payload already held, if any; an implementation may use
/// it for a conditional request and return the held payload's marker when nothing changed.
pub trait Fetcher: Send + Sync {
    fn fetch_all(&self, sdk_key: &str, last_modified: Option<&str>)
        -> Result<ApiResponse, FetchError>;
}
