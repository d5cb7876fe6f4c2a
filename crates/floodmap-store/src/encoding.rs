//! Content-encoding variants of a tile artifact.

/// A content-encoding a payload can be stored or served under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Brotli, the preferred pyramid variant.
    Brotli,
    /// gzip.
    Gzip,
    /// Uncompressed.
    Identity,
}

impl Encoding {
    /// File suffix appended to `<y>.u16` for this variant.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Encoding::Brotli => ".br",
            Encoding::Gzip => ".gz",
            Encoding::Identity => "",
        }
    }

    /// `Content-Encoding` header value, `None` for identity.
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            Encoding::Brotli => Some("br"),
            Encoding::Gzip => Some("gzip"),
            Encoding::Identity => None,
        }
    }

    /// Short token used in manifests and CLI flags.
    pub fn token(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gz",
            Encoding::Identity => "raw",
        }
    }

    /// Parse an `Accept-Encoding` header into an ordered preference list.
    ///
    /// Preferences keep the header's order; entries with an explicit
    /// `q=0` are dropped; `*` admits identity. Identity is always an
    /// acceptable final fallback per RFC 9110, so it is appended when not
    /// already present.
    pub fn parse_preferences(header: &str) -> Vec<Encoding> {
        let mut prefs = Vec::new();
        for part in header.split(',') {
            let mut pieces = part.trim().split(';');
            let name = pieces.next().unwrap_or("").trim();
            let rejected = pieces.any(|p| {
                let p = p.trim();
                p.strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f64>().ok())
                    .is_some_and(|q| q == 0.0)
            });
            if rejected {
                continue;
            }
            let encoding = match name {
                "br" => Some(Encoding::Brotli),
                "gzip" | "x-gzip" => Some(Encoding::Gzip),
                "identity" | "*" => Some(Encoding::Identity),
                _ => None,
            };
            if let Some(encoding) = encoding {
                if !prefs.contains(&encoding) {
                    prefs.push(encoding);
                }
            }
        }
        if !prefs.contains(&Encoding::Identity) {
            prefs.push(Encoding::Identity);
        }
        prefs
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_keep_header_order() {
        assert_eq!(
            Encoding::parse_preferences("br, gzip, identity"),
            vec![Encoding::Brotli, Encoding::Gzip, Encoding::Identity]
        );
        assert_eq!(
            Encoding::parse_preferences("gzip, br"),
            vec![Encoding::Gzip, Encoding::Brotli, Encoding::Identity]
        );
    }

    #[test]
    fn identity_is_always_a_fallback() {
        assert_eq!(Encoding::parse_preferences(""), vec![Encoding::Identity]);
        assert_eq!(
            Encoding::parse_preferences("zstd, deflate"),
            vec![Encoding::Identity]
        );
    }

    #[test]
    fn q_zero_drops_an_encoding() {
        assert_eq!(
            Encoding::parse_preferences("br;q=0, gzip"),
            vec![Encoding::Gzip, Encoding::Identity]
        );
    }

    #[test]
    fn wildcard_admits_identity() {
        assert_eq!(
            Encoding::parse_preferences("*"),
            vec![Encoding::Identity]
        );
    }

    #[test]
    fn file_suffixes() {
        assert_eq!(Encoding::Brotli.file_suffix(), ".br");
        assert_eq!(Encoding::Gzip.file_suffix(), ".gz");
        assert_eq!(Encoding::Identity.file_suffix(), "");
    }
}
