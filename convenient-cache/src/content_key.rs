//! Second-level content keys
//!
//! A content key names the stored bytes of an artifact. Rule keys point at
//! content keys, so one archive can be shared by many rule keys.
//!
//! String forms, recognised in this order:
//!
//! | form | type |
//! |---|---|
//! | `cas/<hash>:<size>` | [`ContentKeyType::CasOnly`] |
//! | `cache/<hash>:<size>` | [`ContentKeyType::CacheOnly`] |
//! | `<prefix>/<hash>:<size>` | [`ContentKeyType::Unknown`] |
//! | `<40 hex>...` | [`ContentKeyType::OldStyle`] |
//! | anything else | [`ContentKeyType::Unknown`] |

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

const CAS_PREFIX: &str = "cas/";
const CACHE_PREFIX: &str = "cache/";
const OLD_STYLE_HASH_LEN: usize = 40;

/// Where the content behind a key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKeyType {
    /// Bare hash written before prefixes existed
    OldStyle,
    /// Content-addressable service only
    CasOnly,
    /// Artifact cache only
    CacheOnly,
    /// Unrecognised form, passed through unchanged
    Unknown,
}

/// Parsed content key. Parsing never fails and `to_string` returns the
/// original text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecondLevelContentKey {
    kind: ContentKeyType,
    key: String,
}

impl SecondLevelContentKey {
    /// Parse a raw key
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(CAS_PREFIX) {
            return Self::with_type(ContentKeyType::CasOnly, rest);
        }
        if let Some(rest) = raw.strip_prefix(CACHE_PREFIX) {
            return Self::with_type(ContentKeyType::CacheOnly, rest);
        }
        let old_style = !raw.contains('/')
            && raw.len() >= OLD_STYLE_HASH_LEN
            && raw.as_bytes()[..OLD_STYLE_HASH_LEN]
                .iter()
                .all(u8::is_ascii_hexdigit);
        if old_style {
            Self::with_type(ContentKeyType::OldStyle, raw)
        } else {
            Self::with_type(ContentKeyType::Unknown, raw)
        }
    }

    /// Key for bytes stored in the artifact cache
    #[must_use]
    pub fn cache_only(digest_hash: &str, digest_bytes: u64) -> Self {
        Self::with_type(
            ContentKeyType::CacheOnly,
            &format!("{digest_hash}:{digest_bytes}"),
        )
    }

    fn with_type(kind: ContentKeyType, key: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
        }
    }

    /// Key type
    #[must_use]
    pub fn kind(&self) -> ContentKeyType {
        self.kind
    }

    /// Key without its type prefix
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Digest hash part
    #[must_use]
    pub fn digest_hash(&self) -> &str {
        match self.kind {
            ContentKeyType::OldStyle => &self.key[..OLD_STYLE_HASH_LEN],
            ContentKeyType::CasOnly | ContentKeyType::CacheOnly | ContentKeyType::Unknown => self
                .key
                .rsplit_once(':')
                .map_or(self.key.as_str(), |(hash, _)| hash),
        }
    }

    /// Digest size part, 0 when the key carries none
    #[must_use]
    pub fn digest_bytes(&self) -> u64 {
        match self.kind {
            ContentKeyType::OldStyle => 0,
            ContentKeyType::CasOnly | ContentKeyType::CacheOnly | ContentKeyType::Unknown => self
                .key
                .rsplit_once(':')
                .and_then(|(_, size)| size.parse().ok())
                .unwrap_or(0),
        }
    }
}

impl fmt::Display for SecondLevelContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ContentKeyType::CasOnly => write!(f, "{CAS_PREFIX}{}", self.key),
            ContentKeyType::CacheOnly => write!(f, "{CACHE_PREFIX}{}", self.key),
            ContentKeyType::OldStyle | ContentKeyType::Unknown => f.write_str(&self.key),
        }
    }
}

impl FromStr for SecondLevelContentKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(Self::parse(s))
    }
}

impl Serialize for SecondLevelContentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SecondLevelContentKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(raw: &str, kind: ContentKeyType, key: &str, hash: &str, bytes: u64) {
        let parsed = SecondLevelContentKey::parse(raw);
        assert_eq!(parsed.to_string(), raw, "round trip of {raw}");
        assert_eq!(parsed.kind(), kind, "type of {raw}");
        assert_eq!(parsed.key(), key);
        assert_eq!(parsed.digest_hash(), hash);
        assert_eq!(parsed.digest_bytes(), bytes);
    }

    #[test]
    fn test_old_style() {
        check(
            "8f459ab30afc9c154cd94f5d5d4cf7b949ffb8fc2c00",
            ContentKeyType::OldStyle,
            "8f459ab30afc9c154cd94f5d5d4cf7b949ffb8fc2c00",
            "8f459ab30afc9c154cd94f5d5d4cf7b949ffb8fc",
            0,
        );
    }

    #[test]
    fn test_short_bare_string_is_unknown() {
        check("asdf", ContentKeyType::Unknown, "asdf", "asdf", 0);
    }

    #[test]
    fn test_cas_only() {
        check(
            "cas/597b4cc3b19069e6361dfe878bbc992498dacc30:139562",
            ContentKeyType::CasOnly,
            "597b4cc3b19069e6361dfe878bbc992498dacc30:139562",
            "597b4cc3b19069e6361dfe878bbc992498dacc30",
            139_562,
        );
    }

    #[test]
    fn test_cache_only() {
        check(
            "cache/9674344c90c2f0646f0b78026e127c9b86e3ad77:20971520",
            ContentKeyType::CacheOnly,
            "9674344c90c2f0646f0b78026e127c9b86e3ad77:20971520",
            "9674344c90c2f0646f0b78026e127c9b86e3ad77",
            20_971_520,
        );
    }

    #[test]
    fn test_unknown_prefix_passes_through() {
        check(
            "buck/7a8bf8efc28275f9957f283c4dea66cc98b0c29b:314572800",
            ContentKeyType::Unknown,
            "buck/7a8bf8efc28275f9957f283c4dea66cc98b0c29b:314572800",
            "buck/7a8bf8efc28275f9957f283c4dea66cc98b0c29b",
            314_572_800,
        );
    }

    #[test]
    fn test_constructed_cache_key() {
        let key = SecondLevelContentKey::cache_only("abc", 12);
        assert_eq!(key.to_string(), "cache/abc:12");
        assert_eq!(SecondLevelContentKey::parse("cache/abc:12"), key);
    }
}
