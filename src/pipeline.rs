//! Per-track processing from source URL to final audio file.
//!
//! Every track goes through the same steps:
//!
//! 1. The source URL is classified by its path suffix into a [`Route`].
//! 2. Direct media is streamed straight into the final file.
//! 3. Playlists are assembled block by block into an intermediate file, which
//!    is handed to the external encoder and then deleted.
//!
//! Tracks are processed strictly one after the other. A failure anywhere ends
//! the current track only: it is logged, counted in the [`Summary`] and the
//! next track is started.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use futures_util::StreamExt;
use tempfile::TempPath;
use tokio::{fs, io::AsyncWriteExt, sync::mpsc::UnboundedSender};
use url::Url;

use crate::{
    assembler::Assembler,
    catalog::TrackDescriptor,
    config::Config,
    error::{Error, ErrorKind, Result},
    events::Event,
    http,
    key::KeyResolver,
    playlist,
    segment::{self, SegmentFetcher},
    transcode::Encoder,
    util::sanitize_file_name,
};

/// Extension of final audio files.
pub const FINAL_EXTENSION: &str = "mp3";

/// Extension of intermediate files assembled from playlists.
pub const INTERMEDIATE_EXTENSION: &str = "ts";

/// Extension of playlist URLs.
const PLAYLIST_EXTENSION: &str = "m3u8";

/// How a track is obtained.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Already encoded media, downloaded as is.
    DirectDownload,

    /// Segmented playlist, assembled and then encoded.
    PlaylistAssembly,

    /// Anything else. The track is skipped.
    Unsupported,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DirectDownload => write!(f, "direct download"),
            Self::PlaylistAssembly => write!(f, "playlist assembly"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Classifies a source URL by the suffix of its path.
///
/// Query and fragment are ignored, as are case differences. Empty and
/// unparsable URLs are [`Route::Unsupported`].
#[must_use]
pub fn classify(url: &str) -> Route {
    let Ok(url) = Url::parse(url) else {
        return Route::Unsupported;
    };

    let path = url.path().to_ascii_lowercase();
    if path.ends_with(&format!(".{FINAL_EXTENSION}")) {
        Route::DirectDownload
    } else if path.ends_with(&format!(".{PLAYLIST_EXTENSION}")) {
        Route::PlaylistAssembly
    } else {
        Route::Unsupported
    }
}

/// Outcome of a run over a track list.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Summary {
    /// Tracks with a final file.
    pub completed: usize,

    /// Tracks with an unsupported source URL.
    pub skipped: usize,

    /// Tracks that failed while downloading, assembling or encoding.
    pub failed: usize,
}

impl Summary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} completed, {} skipped, {} failed",
            self.completed, self.skipped, self.failed
        )
    }
}

/// Downloads tracks into the output directory.
#[derive(Debug)]
pub struct Pipeline {
    output_dir: PathBuf,
    client: http::Client,
    encoder: Encoder,
    event_tx: Option<UnboundedSender<Event>>,
}

impl Pipeline {
    /// Creates a pipeline writing to `config.output_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            output_dir: config.output_dir.clone(),
            client: http::Client::new(config)?,
            encoder: Encoder::new(config.encoder.clone()),
            event_tx: None,
        })
    }

    /// Sends progress [`Event`]s to `event_tx`.
    #[must_use]
    pub fn with_events(mut self, event_tx: UnboundedSender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Processes `tracks` in order. Track numbers start at 1.
    ///
    /// # Errors
    ///
    /// Returns an error only if the output directory cannot be created.
    /// Failing tracks are counted in the summary instead.
    pub async fn run(&self, tracks: &[TrackDescriptor]) -> Result<Summary> {
        fs::create_dir_all(&self.output_dir).await?;

        let mut summary = Summary::default();
        for (i, track) in tracks.iter().enumerate() {
            let index = i + 1;
            match self.process(index, track).await {
                Ok(route) => {
                    summary.completed += 1;
                    self.emit(Event::TrackCompleted { index, route });
                }
                Err(e) => {
                    if e.kind == ErrorKind::Classification {
                        summary.skipped += 1;
                        warn!("skipping {}: {e}", track.label(index));
                    } else {
                        summary.failed += 1;
                        error!("{} failed: {e}", track.label(index));
                    }
                    self.emit(Event::TrackSkipped {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Processes the track at 1-based `index` and returns the route taken.
    ///
    /// # Errors
    ///
    /// Returns `Classification` for unsupported URLs, or the error that
    /// ended the track.
    pub async fn process(&self, index: usize, track: &TrackDescriptor) -> Result<Route> {
        let label = track.label(index);
        self.emit(Event::TrackStarted { index });

        let route = classify(&track.url);
        if route == Route::Unsupported {
            return Err(Error::classification(format!(
                "unsupported source url \"{}\"",
                track.url
            )));
        }

        let url = Url::parse(&track.url)?;
        let name = sanitize_file_name(&label);
        let output = self.path(&name, FINAL_EXTENSION);
        info!("{label}: {route}");

        if route == Route::DirectDownload {
            self.download(&url, &output).await?;
        } else {
            // Removed when dropped, which includes the future being cancelled.
            let intermediate = TempPath::from_path(self.path(&name, INTERMEDIATE_EXTENSION));
            let result = match self.assemble(index, &url, &intermediate).await {
                Ok(()) => self.encoder.encode(&intermediate, &output).await,
                Err(e) => Err(e),
            };

            remove_intermediate(intermediate);
            result?;
        }

        info!("{label}: saved to {}", output.display());
        Ok(route)
    }

    /// Streams `url` into `output`. A partial file is removed, also when the
    /// download is cancelled.
    async fn download(&self, url: &Url, output: &Path) -> Result<()> {
        let response = self.client.get_response(url).await?;

        let partial = TempPath::from_path(output);
        let mut file = fs::File::create(&partial).await?;

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut bytes_written = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len();
        }

        file.flush().await?;
        drop(file);
        partial.keep().map_err(io::Error::from)?;

        debug!("downloaded {bytes_written} bytes from {url}");
        Ok(())
    }

    /// Assembles the playlist at `url` into `intermediate`.
    ///
    /// The assembler and its file are dropped, and thereby closed, on every
    /// return path.
    async fn assemble(&self, index: usize, url: &Url, intermediate: &Path) -> Result<()> {
        let text = self.client.get_text(url).await?;
        let blocks = playlist::blocks(playlist::parse(&text)?);
        let base_url = segment::base_url(url)?;
        debug!("{url}: {} key blocks", blocks.len());

        let fetcher = SegmentFetcher::new(self.client.clone());
        let mut keys = KeyResolver::new(self.client.clone());
        let mut assembler = Assembler::create(intermediate).await?;

        for (i, block) in blocks.iter().enumerate() {
            let report = assembler
                .append_block(block, &base_url, &fetcher, &mut keys)
                .await?;

            debug!(
                "block {}/{}: {} bytes, {} segments skipped",
                i + 1,
                blocks.len(),
                report.bytes,
                report.skipped.len()
            );
            for uri in report.skipped {
                self.emit(Event::SegmentSkipped { index, uri });
            }
            self.emit(Event::BlockAppended {
                index,
                block: i + 1,
                blocks: blocks.len(),
                bytes: report.bytes,
            });
        }

        assembler.finish().await?;
        Ok(())
    }

    fn path(&self, name: &str, extension: &str) -> PathBuf {
        // Not `with_extension`: names contain dots.
        self.output_dir.join(format!("{name}.{extension}"))
    }

    fn emit(&self, event: Event) {
        if let Some(event_tx) = &self.event_tx {
            // A closed channel only means nobody listens anymore.
            let _ = event_tx.send(event);
        }
    }
}

/// Deletes an intermediate file, whether or not encoding succeeded.
fn remove_intermediate(path: TempPath) {
    let display = path.display().to_string();
    match path.close() {
        Ok(()) => trace!("removed {display}"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {display}: {e}"),
    }
}
