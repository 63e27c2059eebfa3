//! Segment retrieval.
//!
//! Segments are fetched one at a time with a single GET each. There are no
//! retries: a failed segment is reported to the caller, which decides to
//! carry on without it.

use bytes::Bytes;
use url::Url;

use crate::{
    error::{Error, ErrorKind, Result},
    http,
};

/// Returns the directory of `playlist_url`, against which relative segment
/// and key URIs are resolved.
///
/// Query and fragment are dropped; the path is cut after its last `/`.
///
/// # Errors
///
/// Returns `InvalidArgument` for URLs that cannot have a path, like `data:`.
pub fn base_url(playlist_url: &Url) -> Result<Url> {
    if playlist_url.cannot_be_a_base() {
        return Err(Error::invalid_argument(format!(
            "{playlist_url} cannot be a base url"
        )));
    }

    let mut base = playlist_url.clone();
    base.set_query(None);
    base.set_fragment(None);

    let directory = match base.path().rfind('/') {
        Some(slash) => base.path()[..=slash].to_owned(),
        None => String::from("/"),
    };
    base.set_path(&directory);

    Ok(base)
}

/// Resolves a URI as written in the playlist against `base`.
///
/// Absolute URIs are returned unchanged.
///
/// # Errors
///
/// Returns `InvalidArgument` if the URI cannot be joined.
pub fn resolve(base: &Url, uri: &str) -> Result<Url> {
    Ok(base.join(uri)?)
}

/// Downloads raw segment bytes.
#[derive(Clone, Debug)]
pub struct SegmentFetcher {
    client: http::Client,
}

impl SegmentFetcher {
    #[must_use]
    pub fn new(client: http::Client) -> Self {
        Self { client }
    }

    /// Fetches the segment `uri`, relative to `base_url`, in full.
    ///
    /// # Errors
    ///
    /// Returns `SegmentFetch` if the URI is invalid, the request fails or the
    /// server answers with a non-success status.
    pub async fn fetch(&self, base_url: &Url, uri: &str) -> Result<Bytes> {
        let url = resolve(base_url, uri).map_err(|e| e.with_kind(ErrorKind::SegmentFetch))?;

        let segment = self
            .client
            .get_bytes(&url)
            .await
            .map_err(|e| e.with_kind(ErrorKind::SegmentFetch))?;

        trace!("fetched {} bytes from {url}", segment.len());
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn base_url_is_playlist_directory() {
        assert_eq!(
            base_url(&url("https://cs1.vkuseraudio.net/s/v1/ac/abc/index.m3u8?extra=x/y")).unwrap(),
            url("https://cs1.vkuseraudio.net/s/v1/ac/abc/")
        );
        assert_eq!(
            base_url(&url("https://cdn.example/index.m3u8")).unwrap(),
            url("https://cdn.example/")
        );
    }

    #[test]
    fn relative_and_absolute_segments() {
        let base = url("https://cdn.example/a/b/");
        assert_eq!(
            resolve(&base, "seg-1-a1.ts?extra=1").unwrap(),
            url("https://cdn.example/a/b/seg-1-a1.ts?extra=1")
        );
        assert_eq!(
            resolve(&base, "https://other.example/seg.ts").unwrap(),
            url("https://other.example/seg.ts")
        );
        assert_eq!(
            resolve(&base, "../key.pub").unwrap(),
            url("https://cdn.example/a/key.pub")
        );
    }

    #[test]
    fn opaque_urls_have_no_base() {
        assert!(base_url(&url("data:text/plain,hello")).is_err());
    }
}
