use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// The canonical fingerprint of one history query.
///
/// Keys are built from normalized, human-readable metadata describing the
/// query parameters. Two parameter sets that are semantically identical
/// (same account set in a different order, omitted vs. explicit defaults)
/// produce the same key and therefore share one cache entry and one
/// in-flight fetch.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // a short prefix is enough to correlate log lines
        for b in &self.hash[..4] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Returns the human-readable metadata that forms the basis of this key.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// The full hex-formatted fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in &self.hash {
            out.write_fmt(format_args!("{b:02x}")).unwrap();
        }
        out
    }

    #[cfg(test)]
    pub fn for_testing(metadata: impl Into<String>) -> Self {
        let mut builder = CacheKeyBuilder::new();
        builder.write_str(&metadata.into()).unwrap();
        builder.build()
    }
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the
/// intention of it is to accept human readable, but most importantly
/// **stable**, input: query types are expected to write one line per
/// parameter, after applying their normalization table (sorted lists,
/// defaults filled in). The input is then hashed to form the [`CacheKey`],
/// and retained as metadata for diagnostics.
///
/// **NOTE**: Care must be taken to make sure that this metadata is stable,
/// as it would otherwise lead to bad cache reuse.
#[derive(Debug, Default)]
pub struct CacheKeyBuilder {
    metadata: String,
}

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one normalized `name: value` parameter line.
    pub fn write_param(&mut self, name: &str, value: impl fmt::Display) -> Result<(), fmt::Error> {
        writeln!(self.metadata, "{name}: {value}")
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash = Sha256::digest(&self.metadata);
        let hash = <[u8; 32]>::try_from(hash.as_slice()).expect("sha256 outputs 32 bytes");

        CacheKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_metadata_equal_keys() {
        let mut a = CacheKeyBuilder::new();
        a.write_param("emails", "a@x,b@x").unwrap();
        a.write_param("symbol", "BTCUSDT").unwrap();
        let a = a.build();

        let mut b = CacheKeyBuilder::new();
        b.write_param("emails", "a@x,b@x").unwrap();
        b.write_param("symbol", "BTCUSDT").unwrap();
        let b = b.build();

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.metadata(), "emails: a@x,b@x\nsymbol: BTCUSDT\n");
    }

    #[test]
    fn test_different_metadata_different_keys() {
        let mut a = CacheKeyBuilder::new();
        a.write_param("symbol", "BTCUSDT").unwrap();
        let a = a.build();

        let mut b = CacheKeyBuilder::new();
        b.write_param("symbol", "ETHUSDT").unwrap();
        let b = b.build();

        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_hash_prefix() {
        let key = CacheKey::for_testing("whatever");
        assert_eq!(key.to_string(), key.fingerprint()[..8].to_string());
    }
}
