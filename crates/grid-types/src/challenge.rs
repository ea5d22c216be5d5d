//! Canonical challenge serialization.
//!
//! Every object that enters a deployment hash writes its fields, in a fixed
//! order, into a [`ChallengeWriter`]. Numbers are written in decimal,
//! booleans as `true`/`false`, strings verbatim, with no separators.

use std::fmt::Display;

/// Accumulates the canonical byte string of an object.
#[derive(Debug, Default)]
pub struct ChallengeWriter {
    buf: String,
}

impl ChallengeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: impl Display) -> &mut Self {
        use std::fmt::Write;
        // Writing into a String cannot fail.
        let _ = write!(self.buf, "{value}");
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

/// MD5 digest of a canonical challenge string.
pub fn md5_digest(bytes: &[u8]) -> [u8; 16] {
    use md5::{Digest, Md5};
    let digest = Md5::digest(bytes);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Types that contribute to a challenge hash.
pub trait Challenge {
    fn challenge(&self, w: &mut ChallengeWriter);
}

impl<T: Challenge> Challenge for [T] {
    fn challenge(&self, w: &mut ChallengeWriter) {
        for item in self {
            item.challenge(w);
        }
    }
}

impl<T: Challenge> Challenge for Option<T> {
    fn challenge(&self, w: &mut ChallengeWriter) {
        if let Some(inner) = self {
            inner.challenge(w);
        }
    }
}
