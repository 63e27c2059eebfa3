//! Key material and stream decryption for encrypted playlists.
//!
//! # Encryption Format
//!
//! Encrypted key blocks use:
//! * AES-128 with a 16-byte key fetched as raw bytes from the key URI
//! * CFB mode with full-block (128-bit) feedback, i.e. a stream cipher
//! * A fixed, all-zero IV
//!
//! CFB turns the block cipher into a keystream, so the decrypted output is
//! exactly as long as the input and no padding is involved. The keystream runs
//! on across segment and block boundaries for as long as the key URI stays the
//! same: consecutive blocks under one key decrypt as if they were one.
//!
//! # Example
//!
//! ```rust
//! use vkaudio::key::KeyResolver;
//!
//! let mut keys = KeyResolver::new(client);
//! let cipher = keys.resolve(&key_uri).await?;
//! cipher.decrypt(&mut buffer);
//! ```

use std::{fmt, ops::Deref};

use aes::Aes128;
use cfb_mode::{cipher::KeyIvInit, BufDecryptor};
use url::Url;

use crate::{
    error::{Error, ErrorKind, Result},
    http,
};

/// Length of decryption keys in bytes.
pub const KEY_LENGTH: usize = 16;

/// Raw key bytes.
pub type RawKey = [u8; KEY_LENGTH];

/// Initialization vector used for every key.
///
/// The stream does not carry an IV and none is derived from the segment
/// sequence number, although HLS would normally do so. Content decrypted with
/// a zero IV is what the provider serves, so it stays zero.
pub const ZERO_IV: [u8; 16] = [0; 16];

/// Validated decryption key.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Key(RawKey);

impl TryFrom<&[u8]> for Key {
    type Error = Error;

    /// Validates fetched key material.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the material isn't exactly 16 bytes.
    fn try_from(bytes: &[u8]) -> std::result::Result<Self, Self::Error> {
        let key = RawKey::try_from(bytes).map_err(|_| {
            Error::key_fetch(format!(
                "key length is {} but should be {KEY_LENGTH}",
                bytes.len()
            ))
        })?;

        Ok(Self(key))
    }
}

impl From<RawKey> for Key {
    fn from(key: RawKey) -> Self {
        Self(key)
    }
}

impl Deref for Key {
    type Target = RawKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Keys are never printed.
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Running decryption state for one key URI.
pub struct CipherContext {
    key_uri: Url,
    cipher: BufDecryptor<Aes128>,
}

impl CipherContext {
    /// Starts a fresh keystream for `key`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the cipher rejects the key or IV length, which
    /// cannot happen for a validated [`Key`].
    pub fn new(key_uri: Url, key: &Key) -> Result<Self> {
        let cipher = BufDecryptor::<Aes128>::new_from_slices(&key[..], &ZERO_IV)
            .map_err(|e| Error::internal(e.to_string()))?;

        Ok(Self { key_uri, cipher })
    }

    #[must_use]
    pub fn key_uri(&self) -> &Url {
        &self.key_uri
    }

    /// Decrypts `buffer` in place, continuing the keystream where the
    /// previous call left off.
    pub fn decrypt(&mut self, buffer: &mut [u8]) {
        self.cipher.decrypt(buffer);
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("key_uri", &self.key_uri.as_str())
            .finish_non_exhaustive()
    }
}

/// Fetches keys and owns the single live [`CipherContext`].
///
/// One resolver is used per track, so keystreams never run across tracks.
#[derive(Debug)]
pub struct KeyResolver {
    client: http::Client,
    current: Option<CipherContext>,
}

impl KeyResolver {
    #[must_use]
    pub fn new(client: http::Client) -> Self {
        Self {
            client,
            current: None,
        }
    }

    /// Returns the cipher context for `key_uri`.
    ///
    /// When `key_uri` is the URI of the live context, that context is
    /// returned as is, keystream position included. Otherwise the key is
    /// fetched and a new context replaces the live one.
    ///
    /// # Errors
    ///
    /// Returns `KeyFetch` if the key cannot be downloaded or is not 16 bytes
    /// long. The live context is left untouched in that case.
    pub async fn resolve(&mut self, key_uri: &Url) -> Result<&mut CipherContext> {
        let is_cached = self
            .current
            .as_ref()
            .is_some_and(|context| context.key_uri() == key_uri);

        if is_cached {
            trace!("reusing key {key_uri}");
        } else {
            debug!("fetching key {key_uri}");
            let key = self.fetch(key_uri).await?;
            self.current = Some(CipherContext::new(key_uri.clone(), &key)?);
        }

        self.current
            .as_mut()
            .ok_or_else(|| Error::internal("no cipher context after resolving key"))
    }

    /// Returns the live cipher context, if any.
    #[must_use]
    pub fn current(&self) -> Option<&CipherContext> {
        self.current.as_ref()
    }

    async fn fetch(&self, key_uri: &Url) -> Result<Key> {
        let bytes = self
            .client
            .get_bytes(key_uri)
            .await
            .map_err(|e| e.with_kind(ErrorKind::KeyFetch))?;

        Key::try_from(bytes.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use cfb_mode::BufEncryptor;

    use super::*;

    const KEY: &RawKey = b"0123456789abcdef";

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        let mut buffer = plaintext.to_vec();
        BufEncryptor::<Aes128>::new_from_slices(KEY, &ZERO_IV)
            .unwrap()
            .encrypt(&mut buffer);
        buffer
    }

    fn context() -> CipherContext {
        let uri = Url::parse("https://cdn.example/key.pub").unwrap();
        CipherContext::new(uri, &Key::from(*KEY)).unwrap()
    }

    #[test]
    fn round_trip() {
        let plaintext: Vec<u8> = (0..=255).cycle().take(5000).collect();
        let mut buffer = encrypt(&plaintext);
        assert_ne!(buffer, plaintext);

        context().decrypt(&mut buffer);
        assert_eq!(buffer, plaintext);
    }

    #[test]
    fn output_length_equals_input_length() {
        for len in [0, 1, 15, 16, 17, 188, 1000] {
            let mut buffer = vec![0x47; len];
            context().decrypt(&mut buffer);
            assert_eq!(buffer.len(), len);
        }
    }

    #[test]
    fn keystream_continues_across_calls() {
        let plaintext = b"a stream cipher never resets between blocks under one key";
        let ciphertext = encrypt(plaintext);

        // Split at an offset that is not a multiple of the block size.
        let (first, second) = ciphertext.split_at(21);
        let mut first = first.to_vec();
        let mut second = second.to_vec();

        let mut context = context();
        context.decrypt(&mut first);
        context.decrypt(&mut second);

        first.extend_from_slice(&second);
        assert_eq!(first, plaintext);
    }

    #[test]
    fn fresh_context_restarts_keystream() {
        let ciphertext = encrypt(&[0u8; 32]);

        let mut second_half = ciphertext[16..].to_vec();
        context().decrypt(&mut second_half);
        assert_ne!(second_half, [0u8; 16]);
    }

    #[test]
    fn key_length_is_validated() {
        assert!(Key::try_from(&KEY[..]).is_ok());

        let err = Key::try_from(&KEY[..15]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::KeyFetch);
        assert!(Key::try_from(&[0u8; 32][..]).is_err());
    }

    #[test]
    fn debug_hides_key() {
        assert_eq!(format!("{:?}", Key::from(*KEY)), "Key(<redacted>)");
    }
}
