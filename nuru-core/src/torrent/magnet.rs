//! Swarm locator parsing.
//!
//! Clients submit either a `magnet:` URI or a bare 40-character hex info
//! hash. Only the parts the core needs are extracted; everything else is
//! handed to the engine untouched via [`MagnetLocator::raw`].

use url::Url;

use super::InfoHash;

const BTIH_PREFIX: &str = "urn:btih:";

/// A parsed swarm locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLocator {
    /// Original string as submitted by the client
    pub raw: String,
    /// Info hash from the `xt` parameter
    pub info_hash: InfoHash,
    /// Optional display name (`dn`)
    pub display_name: Option<String>,
    /// Tracker URLs (`tr`), in submission order
    pub trackers: Vec<String>,
}

impl MagnetLocator {
    /// Parses a magnet URI or bare hex info hash.
    ///
    /// # Errors
    ///
    /// - `LocatorError::Empty` - Blank input
    /// - `LocatorError::Malformed` - Not a magnet URI, or missing/invalid `xt`
    pub fn parse(locator: &str) -> Result<Self, LocatorError> {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::Empty);
        }

        if let Ok(info_hash) = InfoHash::from_hex(trimmed) {
            return Ok(Self {
                raw: trimmed.to_string(),
                info_hash,
                display_name: None,
                trackers: Vec::new(),
            });
        }

        let url = Url::parse(trimmed).map_err(|e| LocatorError::Malformed {
            reason: format!("not a URI: {e}"),
        })?;
        if url.scheme() != "magnet" {
            return Err(LocatorError::Malformed {
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hash) = value.strip_prefix(BTIH_PREFIX) {
                        info_hash = Some(InfoHash::from_hex(hash).map_err(|e| {
                            LocatorError::Malformed {
                                reason: e.to_string(),
                            }
                        })?);
                    }
                }
                "dn" if !value.is_empty() => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| LocatorError::Malformed {
            reason: "missing xt=urn:btih parameter".to_string(),
        })?;

        Ok(Self {
            raw: trimmed.to_string(),
            info_hash,
            display_name,
            trackers,
        })
    }

    /// Display name, falling back to a readable prefix of the hash.
    pub fn name_or_fallback(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("Torrent_{}", &self.info_hash.to_string()[..16]))
    }
}

/// Errors produced while parsing a swarm locator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LocatorError {
    #[error("magnet link is required")]
    Empty,

    #[error("malformed magnet link: {reason}")]
    Malformed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_full_magnet() {
        let magnet = format!(
            "magnet:?xt=urn:btih:{HASH}&dn=Big+Buck+Bunny&tr=udp%3A%2F%2Ftracker.example%3A80&tr=http://t2.example/announce"
        );
        let locator = MagnetLocator::parse(&magnet).unwrap();

        assert_eq!(locator.info_hash.to_string(), HASH);
        assert_eq!(locator.display_name.as_deref(), Some("Big Buck Bunny"));
        assert_eq!(
            locator.trackers,
            vec![
                "udp://tracker.example:80".to_string(),
                "http://t2.example/announce".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_bare_hash() {
        let locator = MagnetLocator::parse(HASH).unwrap();
        assert_eq!(locator.info_hash.to_string(), HASH);
        assert!(locator.display_name.is_none());
        assert!(locator.name_or_fallback().starts_with("Torrent_0123456789abcdef"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(MagnetLocator::parse("  "), Err(LocatorError::Empty)));
        assert!(matches!(
            MagnetLocator::parse("http://example.com/file.torrent"),
            Err(LocatorError::Malformed { .. })
        ));
        assert!(matches!(
            MagnetLocator::parse("magnet:?dn=no-hash"),
            Err(LocatorError::Malformed { .. })
        ));
        assert!(matches!(
            MagnetLocator::parse("magnet:?xt=urn:btih:1234"),
            Err(LocatorError::Malformed { .. })
        ));
    }
}
