//! Media playlist tokenizer.
//!
//! Turns playlist text into an ordered list of [`Entry`] values and groups
//! those into [`KeyBlock`]s. Only the subset of HLS needed for fixed-length,
//! single-variant VOD audio is understood:
//!
//! ```text
//! #EXTM3U
//! #EXT-X-TARGETDURATION:10
//! #EXT-X-KEY:METHOD=AES-128,URI="https://cdn.example/key.pub"
//! #EXTINF:10.000,
//! seg-1-a1.ts
//! #EXT-X-KEY:METHOD=NONE
//! #EXTINF:10.000,
//! seg-2-a1.ts
//! ```
//!
//! Everything before the first `#EXT-X-KEY` declaration is discarded. After
//! it, a segment is either a bare URI line or a quoted `URI="..."` attribute
//! on any other line; the key declaration's own `URI` never counts as a
//! segment. Tags other than the key declaration carry no meaning here.
//!
//! # Example
//!
//! ```rust
//! use vkaudio::playlist::{self, Method};
//!
//! let entries = playlist::parse(text)?;
//! for block in playlist::blocks(entries) {
//!     println!("{} segments, encrypted: {}", block.segments.len(), block.encryption.method == Method::Aes128);
//! }
//! ```

use std::{fmt, sync::LazyLock};

use regex_lite::Regex;

use crate::error::{Error, Result};

/// Tag introducing a key declaration.
const KEY_TAG: &str = "#EXT-X-KEY";

/// A quoted `URI` attribute anywhere on a line.
static URI_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="(.+?)""#).expect("invalid URI attribute pattern"));

/// Encryption method of a key declaration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Method {
    /// Segments are stored in the clear.
    #[default]
    None,

    /// Segments are encrypted with AES-128.
    Aes128,
}

impl Method {
    /// Only `AES-128` is decrypted. Every other method, `SAMPLE-AES`
    /// included, leaves the segments as they are.
    fn from_attribute(value: &str) -> Self {
        match value {
            "AES-128" => Self::Aes128,
            "NONE" => Self::None,
            other => {
                debug!("treating encryption method {other} as NONE");
                Self::None
            }
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Aes128 => write!(f, "AES-128"),
        }
    }
}

/// Contents of a key declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Encryption {
    pub method: Method,

    /// Key location as written in the playlist, possibly relative.
    ///
    /// Always present for [`Method::Aes128`].
    pub key_uri: Option<String>,
}

/// A token of the playlist, in source order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entry {
    /// A key declaration that governs all following segments.
    KeyChange(Encryption),

    /// A media segment location as written in the playlist, possibly relative.
    Segment(String),
}

/// A maximal run of segments governed by one key declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct KeyBlock {
    pub encryption: Encryption,
    pub segments: Vec<String>,
}

impl KeyBlock {
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encryption.method == Method::Aes128
    }
}

/// Tokenizes playlist text.
///
/// # Errors
///
/// Returns `Parse` when the text has no key declaration at all, or when a key
/// declaration is `AES-128` without a `URI`. A missing or unknown `METHOD` is
/// read as `NONE`.
pub fn parse(text: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut seen_key = false;

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();

        if let Some(attributes) = line.strip_prefix(KEY_TAG) {
            let attributes = attributes.strip_prefix(':').unwrap_or(attributes);
            let encryption = parse_key(attributes)
                .map_err(|e| Error::parse(format!("line {}: {}", number + 1, e.error)))?;
            entries.push(Entry::KeyChange(encryption));
            seen_key = true;
            continue;
        }

        // Anything up to the first key declaration is not a segment.
        if !seen_key || line.is_empty() {
            continue;
        }

        let mut quoted = URI_ATTRIBUTE
            .captures_iter(line)
            .filter_map(|captures| captures.get(1))
            .map(|uri| Entry::Segment(uri.as_str().to_owned()))
            .peekable();

        if quoted.peek().is_some() {
            entries.extend(quoted);
        } else if !line.starts_with('#') {
            entries.push(Entry::Segment(line.to_owned()));
        }
    }

    if !seen_key {
        return Err(Error::parse("playlist has no key declaration"));
    }

    Ok(entries)
}

/// Parses the attribute list of a key declaration.
fn parse_key(list: &str) -> Result<Encryption> {
    let mut method = Method::None;
    let mut key_uri = None;

    for (name, value) in attributes(list) {
        match name {
            "METHOD" => method = Method::from_attribute(value),
            "URI" => key_uri = Some(value.to_owned()).filter(|uri| !uri.is_empty()),
            "IV" => {
                // Decryption always starts from a zero IV.
                debug!("ignoring key IV {value}");
            }
            _ => {}
        }
    }

    if method == Method::Aes128 && key_uri.is_none() {
        return Err(Error::parse("AES-128 key declaration without URI"));
    }

    Ok(Encryption { method, key_uri })
}

/// Splits an attribute list into name/value pairs.
///
/// Commas inside quoted values do not separate attributes. Quotes around
/// values are removed.
fn attributes(list: &str) -> Vec<(&str, &str)> {
    let mut result = Vec::new();
    let mut rest = list.trim();

    while !rest.is_empty() {
        let Some((name, tail)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim();

        let (value, tail) = if let Some(quoted) = tail.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, tail)) => (value, tail),
                None => (quoted, ""),
            }
        } else {
            match tail.split_once(',') {
                Some((value, tail)) => (value.trim(), tail),
                None => (tail.trim(), ""),
            }
        };

        result.push((name, value));
        rest = tail.trim_start_matches(|chr: char| chr == ',' || chr.is_whitespace());
    }

    result
}

/// Groups entries into key blocks, in order.
///
/// Every key change opens a new block, even when no segment follows it, so
/// that key rotation is tracked exactly as declared. Segments before the
/// first key change are dropped.
pub fn blocks<I>(entries: I) -> Vec<KeyBlock>
where
    I: IntoIterator<Item = Entry>,
{
    let mut blocks: Vec<KeyBlock> = Vec::new();

    for entry in entries {
        match entry {
            Entry::KeyChange(encryption) => blocks.push(KeyBlock {
                encryption,
                segments: Vec::new(),
            }),
            Entry::Segment(uri) => match blocks.last_mut() {
                Some(block) => block.segments.push(uri),
                None => warn!("dropping segment {uri} without key declaration"),
            },
        }
    }

    blocks
}
