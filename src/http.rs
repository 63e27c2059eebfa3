//! HTTP client for playlists, keys and media.
//!
//! This module provides a thin wrapper around `reqwest::Client` that adds:
//! * The configured `User-Agent` and `Accept-Language` headers
//! * TCP keep-alive, so consecutive segment requests reuse connections
//! * Rejection of non-success status codes
//!
//! Requests are never retried and use the transport's default timeouts.
//!
//! # Example
//!
//! ```rust
//! use vkaudio::http::Client;
//!
//! let client = Client::new(&config)?;
//! let playlist = client.get_text(url).await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use reqwest::{
    header::{HeaderValue, ACCEPT_LANGUAGE},
    Url,
};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// HTTP client shared by every stage of the pipeline.
#[derive(Clone, Debug)]
pub struct Client {
    inner: reqwest::Client,
}

impl Client {
    /// Duration to keep idle connections alive.
    ///
    /// Prevents frequent reconnection overhead for subsequent requests.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when the
    /// `User-Agent` is not a valid header value.
    pub fn new(config: &Config) -> Result<Self> {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let inner = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { inner })
    }

    /// Sends a GET request and returns the response once its status is known
    /// to be successful. The body is left unread.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on connection failure or a non-success status.
    pub async fn get_response(&self, url: &Url) -> Result<reqwest::Response> {
        trace!("GET {url}");
        let response = self.inner.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::unavailable(format!("{url} returned {status}")));
        }

        Ok(response)
    }

    /// Downloads the full body of `url`.
    ///
    /// # Errors
    ///
    /// See [`get_response`](Self::get_response); a body that breaks off
    /// midway is `DataLoss`.
    pub async fn get_bytes(&self, url: &Url) -> Result<Bytes> {
        let body = self.get_response(url).await?.bytes().await?;
        trace!("{url}: {} bytes", body.len());
        Ok(body)
    }

    /// Downloads the full body of `url` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// As [`get_bytes`](Self::get_bytes), and `Parse` if the body is not
    /// valid UTF-8.
    pub async fn get_text(&self, url: &Url) -> Result<String> {
        let body = self.get_bytes(url).await?;
        Ok(String::from_utf8(body.to_vec())?)
    }
}
