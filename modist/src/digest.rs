//! Content digest primitives.
//!
//! Digests are `(algorithm, hex)` pairs rendered as `sha256:<hex>`. Every
//! digest that crosses a trust boundary is validated against a fixed
//! algorithm allow-list before it is used to build a filesystem path or
//! look up a blob.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};

use crate::{Error, Result};

/// Digest algorithms this system accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Algorithm {
    /// SHA-256, 64 hex characters.
    Sha256,
    /// SHA-512, 128 hex characters.
    Sha512,
}

impl Algorithm {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Required hex-string length for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Looks up an algorithm by its canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parses and validates an `<algorithm>:<hex>` digest string.
    pub fn parse(s: &str) -> Result<Self> {
        let (alg, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(s.to_owned()))?;
        let algorithm =
            Algorithm::from_name(alg).ok_or_else(|| Error::InvalidDigest(s.to_owned()))?;
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidDigest(s.to_owned()));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Computes the SHA-256 digest of a byte slice.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// Computes the SHA-512 digest of a byte slice.
    pub fn sha512(data: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha512,
            hex: hex::encode(Sha512::digest(data)),
        }
    }

    /// Streams a file through SHA-256, returning its digest and length.
    pub fn sha256_file(path: &Path) -> Result<(Self, u64)> {
        let file = fs::File::open(path)?;
        Self::sha256_reader(file)
    }

    /// Streams a reader through SHA-256, returning its digest and length.
    pub fn sha256_reader(reader: impl Read) -> Result<(Self, u64)> {
        let mut hasher = Sha256::new();
        let mut reader = io::BufReader::new(reader);
        let mut buf = [0u8; 64 * 1024];
        let mut total: u64 = 0;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((
            Self {
                algorithm: Algorithm::Sha256,
                hex: hex::encode(hasher.finalize()),
            },
            total,
        ))
    }

    /// The digest's algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The lowercase hex portion.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Writer that forwards to an inner writer while hashing with SHA-256.
#[derive(Debug)]
pub struct HashWriter<W> {
    writer: W,
    hasher: Sha256,
    written: u64,
}

impl<W> HashWriter<W> {
    /// Wraps `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Total bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Consumes the writer and returns the digest of everything written.
    pub fn finish(self) -> Digest {
        Digest {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(self.hasher.finalize()),
        }
    }
}

impl<W: Write> Write for HashWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_valid_sha256() {
        let d = Digest::parse(&format!("sha256:{EMPTY_SHA256}")).unwrap();
        assert_eq!(d.algorithm(), Algorithm::Sha256);
        assert_eq!(d.hex(), EMPTY_SHA256);
    }

    #[test]
    fn parse_normalizes_case() {
        let upper = EMPTY_SHA256.to_ascii_uppercase();
        let d = Digest::parse(&format!("sha256:{upper}")).unwrap();
        assert_eq!(d.hex(), EMPTY_SHA256);
    }

    #[test]
    fn parse_rejects_unknown_algorithm() {
        assert!(Digest::parse(&format!("md5:{EMPTY_SHA256}")).is_err());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(Digest::parse("sha256:abcd").is_err());
        // sha512 length hex under a sha256 label
        let long = "a".repeat(128);
        assert!(Digest::parse(&format!("sha256:{long}")).is_err());
    }

    #[test]
    fn parse_rejects_non_hex() {
        let bad = format!("sha256:{}", "z".repeat(64));
        assert!(Digest::parse(&bad).is_err());
    }

    #[test]
    fn parse_rejects_missing_colon() {
        assert!(Digest::parse(EMPTY_SHA256).is_err());
    }

    #[test]
    fn sha256_of_bytes() {
        assert_eq!(Digest::sha256(b"").hex(), EMPTY_SHA256);
    }

    #[test]
    fn sha512_round_trips_through_parse() {
        let d = Digest::sha512(b"abc");
        assert_eq!(d.algorithm(), Algorithm::Sha512);
        assert_eq!(d.hex().len(), 128);
        assert_eq!(Digest::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn reader_and_slice_agree() {
        let data = b"hello world";
        let (streamed, len) = Digest::sha256_reader(&data[..]).unwrap();
        assert_eq!(streamed, Digest::sha256(data));
        assert_eq!(len, data.len() as u64);
    }

    #[test]
    fn hash_writer_digests_what_it_forwards() {
        let mut out = Vec::new();
        let mut w = HashWriter::new(&mut out);
        w.write_all(b"abc").unwrap();
        w.write_all(b"def").unwrap();
        assert_eq!(w.written(), 6);
        let digest = w.finish();
        assert_eq!(out, b"abcdef");
        assert_eq!(digest, Digest::sha256(b"abcdef"));
    }

    #[test]
    fn serde_round_trip() {
        let d = Digest::sha256(b"x");
        let json = serde_json::to_string(&d).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
