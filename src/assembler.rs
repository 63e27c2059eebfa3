//! Incremental reassembly of a playlist into one intermediate file.
//!
//! The [`Assembler`] exclusively owns the intermediate file of one track.
//! Key blocks are appended strictly in playlist order:
//!
//! 1. every segment of the block is fetched, in order, into one buffer
//! 2. an encrypted block is decrypted in place with the live keystream
//! 3. the buffer is appended to the end of the file
//!
//! A segment that cannot be fetched is left out and the rest of its block is
//! still decrypted and written. With a stream cipher this garbles the data
//! following the gap until the next key change; the encoder usually recovers
//! from that, so the track is kept rather than dropped.
//!
//! The file handle stays open for the whole track and is closed when the
//! assembler is finished or dropped, whichever path the track takes.

use std::path::{Path, PathBuf};

use tokio::{fs::File, io::AsyncWriteExt};
use url::Url;

use crate::{
    error::{Error, ErrorKind, Result},
    key::KeyResolver,
    playlist::KeyBlock,
    segment::{self, SegmentFetcher},
};

/// Outcome of appending one key block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockReport {
    /// Bytes appended to the file. Equal to the sum of the fetched segment
    /// sizes.
    pub bytes: usize,

    /// Segment URIs that could not be fetched, in playlist order.
    pub skipped: Vec<String>,
}

/// Writer of one intermediate file.
#[derive(Debug)]
pub struct Assembler {
    path: PathBuf,
    file: File,
    bytes_written: u64,
}

impl Assembler {
    /// Creates or truncates the intermediate file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        trace!("assembling into {}", path.display());

        Ok(Self {
            path,
            file,
            bytes_written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Fetches, decrypts if needed, and appends one key block.
    ///
    /// Relative segment and key URIs are resolved against `base_url`.
    ///
    /// The key of an encrypted block is resolved even when the block has no
    /// segments, or none could be fetched. A key change therefore always
    /// restarts the keystream exactly where the playlist declares it, and an
    /// unreachable key fails the block in either case.
    ///
    /// # Errors
    ///
    /// Segment failures are not errors; they are listed in the report.
    /// Returns `KeyFetch` if the block is encrypted and its key cannot be
    /// resolved, and an I/O error if appending fails. Nothing is written for
    /// the block in either case.
    pub async fn append_block(
        &mut self,
        block: &KeyBlock,
        base_url: &Url,
        fetcher: &SegmentFetcher,
        keys: &mut KeyResolver,
    ) -> Result<BlockReport> {
        let mut buffer = Vec::new();
        let mut skipped = Vec::new();

        for uri in &block.segments {
            match fetcher.fetch(base_url, uri).await {
                Ok(segment) => buffer.extend_from_slice(&segment),
                Err(e) => {
                    warn!("skipping segment {uri}: {e}");
                    skipped.push(uri.clone());
                }
            }
        }

        if block.is_encrypted() {
            let key_uri = block
                .encryption
                .key_uri
                .as_deref()
                .ok_or_else(|| Error::key_fetch("encrypted block without key uri"))?;
            let key_uri = segment::resolve(base_url, key_uri)
                .map_err(|e| e.with_kind(ErrorKind::KeyFetch))?;

            keys.resolve(&key_uri).await?.decrypt(&mut buffer);
        }

        self.append(&buffer).await?;

        Ok(BlockReport {
            bytes: buffer.len(),
            skipped,
        })
    }

    /// Appends `bytes` to the end of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Flushes and closes the file, returning its path and size.
    ///
    /// # Errors
    ///
    /// Returns an error if pending writes cannot be completed.
    pub async fn finish(mut self) -> Result<(PathBuf, u64)> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        debug!(
            "assembled {} bytes into {}",
            self.bytes_written,
            self.path.display()
        );

        Ok((self.path, self.bytes_written))
    }
}
