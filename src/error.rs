//! Error handling for vkaudio.
//!
//! Every fallible operation returns [`Result`], whose error carries an
//! [`ErrorKind`] next to the underlying error. The kind decides how far a
//! failure reaches:
//!
//! * [`ErrorKind::SegmentFetch`] skips a single segment
//! * [`ErrorKind::KeyFetch`] aborts the current track
//! * [`ErrorKind::Parse`] and [`ErrorKind::Classification`] skip the current
//!   track
//! * [`ErrorKind::Transcode`] loses the final file of the current track
//!
//! None of them stop the traversal of the track list.
//!
//! # Example
//!
//! ```rust
//! use vkaudio::error::{Error, ErrorKind, Result};
//!
//! fn key_length(key: &[u8]) -> Result<()> {
//!     if key.len() != 16 {
//!         return Err(Error::key_fetch(format!("key is {} bytes", key.len())));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Example
    /// ```
    /// use std::io;
    ///
    /// let io_error = io::Error::new(io::ErrorKind::Other, "oh no!");
    /// let error = Error::from(io_error);
    ///
    /// if let Some(io_err) = error.downcast::<io::Error>() {
    ///     println!("IO error kind: {:?}", io_err.kind());
    /// }
    /// ```
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for vkaudio operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// The first five variants are the failure modes of the download pipeline.
/// The others classify failures of the surrounding plumbing: file system,
/// configuration and network.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Malformed playlist text.
    #[error("playlist parse error")]
    Parse,

    /// Decryption key unreachable or malformed.
    #[error("key fetch error")]
    KeyFetch,

    /// Media segment unreachable.
    #[error("segment fetch error")]
    SegmentFetch,

    /// External encoder failed or could not be started.
    #[error("transcode error")]
    Transcode,

    /// Track URL has no supported shape.
    #[error("unsupported track url")]
    Classification,

    #[error("invalid argument specified")]
    InvalidArgument,

    #[error("not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("already exists")]
    AlreadyExists,

    #[error("service unavailable")]
    Unavailable,

    #[error("operation timed out")]
    DeadlineExceeded,

    #[error("unrecoverable data loss or corruption")]
    DataLoss,

    #[error("internal error")]
    Internal,

    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "catalog file not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for playlist text that cannot be tokenized.
    ///
    /// The track is skipped.
    pub fn parse<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Parse, error)
    }

    /// Creates an error for a decryption key that could not be obtained.
    ///
    /// Without a valid key the remaining blocks cannot be decrypted, so the
    /// track is aborted.
    pub fn key_fetch<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::KeyFetch, error)
    }

    /// Creates an error for a segment that could not be downloaded.
    ///
    /// Only that segment is skipped.
    pub fn segment_fetch<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::SegmentFetch, error)
    }

    /// Creates an error for a failed encoder run.
    pub fn transcode<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Transcode, error)
    }

    /// Creates an error for a track URL that is neither direct media nor a
    /// playlist.
    pub fn classification<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Classification, error)
    }

    /// Creates an error for invalid arguments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::invalid_argument("output directory is a file");
    /// assert_eq!(err.kind, ErrorKind::InvalidArgument);
    /// ```
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    pub fn already_exists<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::AlreadyExists, error)
    }

    /// Creates an error for a remote endpoint that cannot be reached or that
    /// answered with a non-success status.
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for data that was truncated or corrupted in transit
    /// or on disk.
    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DataLoss, error)
    }

    /// Creates an error for internal errors that shouldn't occur during normal
    /// operation.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }

    /// Re-tags this error with another kind, keeping the details.
    ///
    /// Used where a plumbing failure (for example a refused connection) has to
    /// be reported as the pipeline failure it caused (a key fetch failure).
    #[must_use]
    pub fn with_kind(self, kind: ErrorKind) -> Self {
        Self { kind, ..self }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Maps standard IO errors to their logical equivalents:
/// * `NotFound` -> `NotFound`
/// * `PermissionDenied` -> `PermissionDenied`
/// * `UnexpectedEof` -> `DataLoss`
/// * etc.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted | UnexpectedEof | WriteZero => {
                Self::data_loss(err)
            }
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// * Body errors -> `DataLoss`
/// * Decode errors -> `InvalidArgument`
/// * Connect and status errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
/// * Builder errors -> `Internal`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() || err.is_status() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts configuration syntax errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts non-UTF-8 playlist bodies to `Parse`.
impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::parse(e)
    }
}
