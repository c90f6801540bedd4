use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PinwatchError;

/// Identity of one federation endpoint: the publishing entity plus the
/// server's base URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerKey {
    /// Entity that publishes the server
    pub entity_id: String,

    /// Base URI of the server as published in metadata
    pub base_uri: String,
}

impl ServerKey {
    /// Create a key from its two components
    #[must_use]
    pub fn new(entity_id: impl Into<String>, base_uri: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            base_uri: base_uri.into(),
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.base_uri, self.entity_id)
    }
}

/// A published trust pin: a digest of the server certificate under a named
/// algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pin {
    /// Digest algorithm label (only `sha256` is honoured)
    pub alg: String,

    /// Base64 encoded digest
    pub digest: String,
}

impl Pin {
    /// The only algorithm label a pin can match under
    pub const SHA256: &'static str = "sha256";

    /// Create a `sha256` pin
    #[must_use]
    pub fn sha256(digest: impl Into<String>) -> Self {
        Self {
            alg: Self::SHA256.to_string(),
            digest: digest.into(),
        }
    }

    /// Returns true if the pin is labelled `sha256`
    #[must_use]
    pub fn is_sha256(&self) -> bool {
        self.alg == Self::SHA256
    }
}

/// Parses `alg:digest`, e.g. `sha256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=`.
impl FromStr for Pin {
    type Err = PinwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((alg, digest)) if !alg.is_empty() && !digest.is_empty() => Ok(Self {
                alg: alg.to_string(),
                digest: digest.to_string(),
            }),
            _ => Err(PinwatchError::Config(format!(
                "invalid pin '{s}', expected <alg>:<digest>"
            ))),
        }
    }
}

/// A server entry from federation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Base URI the server is reached at
    pub base_uri: String,

    /// Trust anchor for the server
    #[serde(default)]
    pub pins: Vec<Pin>,

    /// Free-form tags published alongside the server
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Server {
    /// Create a server entry with the given pins and no tags
    #[must_use]
    pub fn new(base_uri: impl Into<String>, pins: Vec<Pin>) -> Self {
        Self {
            base_uri: base_uri.into(),
            pins,
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_from_str() {
        let pin: Pin = "sha256:abc=".parse().unwrap();
        assert_eq!(pin, Pin::sha256("abc="));
        assert!(pin.is_sha256());

        let other: Pin = "sha512:abc".parse().unwrap();
        assert!(!other.is_sha256());

        assert!("sha256".parse::<Pin>().is_err());
        assert!(":abc".parse::<Pin>().is_err());
        assert!("sha256:".parse::<Pin>().is_err());
    }

    #[test]
    fn test_server_deserialize_defaults() {
        let server: Server = serde_json::from_str(r#"{"base_uri": "https://a.example.com/"}"#).unwrap();
        assert!(server.pins.is_empty());
        assert!(server.tags.is_empty());
    }

    #[test]
    fn test_key_display() {
        let key = ServerKey::new("https://org.example", "https://api.example.com/");
        assert_eq!(key.to_string(), "https://api.example.com/ (https://org.example)");
    }
}
