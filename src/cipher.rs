//! # Cipher provider
//!
//! Authenticated symmetric encryption for chat messages.
//!
//! Messages are sealed with **XChaCha20-Poly1305** under a 256-bit session key. Each call
//! draws a fresh 192-bit nonce from the OS CSPRNG, so sealing the same plaintext twice
//! yields two different tokens that both open to the same text.
//!
//! ## Token layout
//! ```text
//! base64url_nopad( nonce(24) || ciphertext || tag(16) )
//! ```
//! The token is self-describing: [`decrypt`] needs only the key.
//!
//! ## Quick example
//! ```rust
//! use secure_chat::cipher::{self, EncryptionKey};
//!
//! let key = EncryptionKey::generate();
//! let token = cipher::encrypt("meet at noon", &key).unwrap();
//! assert_eq!(cipher::decrypt(token.as_str(), &key).unwrap(), "meet at noon");
//! ```

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChatError, Result};

/// Key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes (XChaCha20).
const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
const TAG_SIZE: usize = 16;

/// Smallest decoded token: nonce + tag around an empty plaintext.
const MIN_TOKEN_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// A session's symmetric key.
///
/// Owned by exactly one [`Session`](crate::session::Session) and never persisted.
/// Key material is zeroized when dropped and redacted from `Debug` output.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a key from its URL-safe base64 encoding.
    ///
    /// # Errors
    /// `InvalidInput` if the string is not base64url or does not decode to 32 bytes.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let mut decoded = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|_| ChatError::invalid_input("invalid encryption key format"))?;

        if decoded.len() != KEY_SIZE {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(ChatError::invalid_input(format!(
                "invalid encryption key length: expected {KEY_SIZE} bytes, got {actual}"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    /// URL-safe base64 encoding of the key.
    pub fn to_encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// A string known to have been produced by [`encrypt`].
///
/// This is the explicit provenance marker for sealed content: code that holds a
/// `Ciphertext` knows it must be opened with [`decrypt`], without guessing from shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(String);

impl Ciphertext {
    /// Wrap a token read back from storage that only ever receives ciphertext.
    pub fn from_stored(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produce a fresh session key.
pub fn generate_key() -> EncryptionKey {
    EncryptionKey::generate()
}

/// Seal `plaintext` under `key`.
///
/// # Errors
/// `InvalidInput` if `plaintext` is not valid UTF-8 text.
pub fn encrypt(plaintext: impl AsRef<[u8]>, key: &EncryptionKey) -> Result<Ciphertext> {
    let plaintext = plaintext.as_ref();
    std::str::from_utf8(plaintext)
        .map_err(|_| ChatError::invalid_input("plaintext must be UTF-8 text"))?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let sealed = key
        .cipher()
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| ChatError::invalid_input("plaintext could not be sealed"))?;

    let mut token = Vec::with_capacity(NONCE_SIZE + sealed.len());
    token.extend_from_slice(&nonce);
    token.extend_from_slice(&sealed);

    Ok(Ciphertext(URL_SAFE_NO_PAD.encode(token)))
}

/// Open a token produced by [`encrypt`].
///
/// # Errors
/// - `InvalidInput` if the token is not base64url, is too short, or opens to non-UTF-8 bytes.
/// - `AuthenticationFailure` if the token was modified or sealed under a different key.
pub fn decrypt(ciphertext: &str, key: &EncryptionKey) -> Result<String> {
    let token = URL_SAFE_NO_PAD
        .decode(ciphertext)
        .map_err(|_| ChatError::invalid_input("ciphertext is not valid base64url"))?;

    if token.len() < MIN_TOKEN_SIZE {
        return Err(ChatError::invalid_input(format!(
            "ciphertext too short: expected at least {MIN_TOKEN_SIZE} bytes, got {}",
            token.len()
        )));
    }

    let (nonce, sealed) = token.split_at(NONCE_SIZE);
    let opened = key
        .cipher()
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| ChatError::AuthenticationFailure)?;

    String::from_utf8(opened).map_err(|_| ChatError::invalid_input("decrypted payload is not UTF-8"))
}

/// Best-effort guess whether `payload` looks like one of our tokens.
///
/// Checks only the encoding and minimum length. It is never authoritative and must not
/// gate any security decision; use [`Ciphertext`] provenance for that.
pub fn is_probably_encrypted(payload: &str) -> bool {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return false;
    }
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map(|bytes| bytes.len() >= MIN_TOKEN_SIZE)
        .unwrap_or(false)
}
