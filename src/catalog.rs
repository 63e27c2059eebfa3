//! Track descriptors and the catalog they come from.
//!
//! Discovering tracks (logging in, paging through a user's library) is the
//! job of a remote service outside this crate. It is represented by the
//! [`Catalog`] trait, which serves [`Page`]s of [`TrackDescriptor`]s linked by
//! opaque cursors. [`FileCatalog`] implements it on top of a JSON export.
//!
//! # Wire Format
//!
//! Either a flat list of tracks:
//! ```json
//! [
//!     { "artist": "Artist", "title": "Title", "url": "https://.../index.m3u8?extra=..." }
//! ]
//! ```
//!
//! or a list of pages as returned by the remote service:
//! ```json
//! [
//!     { "audios": [{ "artist": "Artist", "title": "Title", "url": "..." }], "next_from": "..." },
//!     { "audios": [] }
//! ]
//! ```

use std::{
    collections::HashSet,
    fmt, fs,
    future::Future,
    io::{BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A playable track as described by the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub artist: String,
    pub title: String,

    /// Source URL. Empty for tracks that are not available.
    #[serde(default)]
    pub url: String,
}

impl TrackDescriptor {
    /// Returns the label of the track at 1-based `index` in the list,
    /// `"<index>. <artist> — <title>"`.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        format!("{index}. {self}")
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} — {}", self.artist, self.title)
    }
}

/// One response of the catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Page {
    pub tracks: Vec<TrackDescriptor>,

    /// Cursor of the next page, `None` on the last page.
    pub next_from: Option<String>,
}

/// Source of track descriptors.
pub trait Catalog {
    /// Returns the page at `cursor`, or the first page for `None`.
    fn page(&mut self, cursor: Option<&str>) -> impl Future<Output = Result<Page>> + Send;
}

/// Follows the cursors of `catalog` and returns all tracks in order.
///
/// # Errors
///
/// Returns the first error of the catalog. Without a complete list there is
/// nothing sensible to download, so this is fatal to the caller.
pub async fn fetch_all<C: Catalog>(catalog: &mut C) -> Result<Vec<TrackDescriptor>> {
    let mut tracks = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen = HashSet::new();

    loop {
        let page = catalog.page(cursor.as_deref()).await?;
        info!("received {} tracks", page.tracks.len());
        tracks.extend(page.tracks);

        match page.next_from.filter(|next| !next.is_empty()) {
            Some(next) if seen.contains(&next) => {
                warn!("catalog returned cursor {next} twice, stopping");
                break;
            }
            Some(next) => {
                seen.insert(next.clone());
                cursor = Some(next);
            }
            None => break,
        }
    }

    Ok(tracks)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Pages(Vec<PageFile>),
    Tracks(Vec<TrackDescriptor>),
}

#[derive(Deserialize)]
struct PageFile {
    audios: Vec<TrackDescriptor>,
}

/// Catalog backed by a JSON file.
///
/// Cursors are page indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileCatalog {
    pages: Vec<Vec<TrackDescriptor>>,
}

impl FileCatalog {
    /// Reads a catalog file in either wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON for
    /// either format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }
}

impl std::str::FromStr for FileCatalog {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let pages = match serde_json::from_str(s)? {
            CatalogFile::Pages(pages) => pages.into_iter().map(|page| page.audios).collect(),
            CatalogFile::Tracks(tracks) => vec![tracks],
        };

        Ok(Self { pages })
    }
}

impl Catalog for FileCatalog {
    async fn page(&mut self, cursor: Option<&str>) -> Result<Page> {
        let index = match cursor {
            Some(cursor) => cursor.parse::<usize>().map_err(|e| {
                Error::invalid_argument(format!("invalid cursor {cursor}: {e}"))
            })?,
            None => 0,
        };

        // An empty file still has one, empty, first page.
        if self.pages.is_empty() && index == 0 {
            return Ok(Page::default());
        }

        let tracks = self
            .pages
            .get(index)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no page at cursor {index}")))?;
        let next_from = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(Page { tracks, next_from })
    }
}

/// Writes the numbered track list to `path`, one label per line.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_listing<P: AsRef<Path>>(path: P, tracks: &[TrackDescriptor]) -> Result<()> {
    let mut file = BufWriter::new(fs::File::create(path)?);
    for (i, track) in tracks.iter().enumerate() {
        writeln!(file, "{}", track.label(i + 1))?;
    }
    file.flush()?;

    Ok(())
}
