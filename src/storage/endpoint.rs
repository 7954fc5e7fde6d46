// dbvault/src/storage/endpoint.rs

/// An object storage endpoint with its scheme folded into a TLS flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub secure: bool,
}

impl Endpoint {
    /// `https://host` and bare `host` are secure, `http://host` is not.
    /// Trailing slashes are dropped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (host, secure) = if let Some(rest) = strip_scheme(raw, "https://") {
            (rest, true)
        } else if let Some(rest) = strip_scheme(raw, "http://") {
            (rest, false)
        } else {
            (raw, true)
        };

        Self {
            host: host.trim_end_matches('/').to_string(),
            secure,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.host)
    }
}

fn strip_scheme<'a>(raw: &'a str, scheme: &str) -> Option<&'a str> {
    match raw.get(..scheme.len()) {
        Some(head) if head.eq_ignore_ascii_case(scheme) => Some(&raw[scheme.len()..]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_becomes_secure_flag() {
        assert_eq!(
            Endpoint::parse("http://minio:9000"),
            Endpoint { host: "minio:9000".to_string(), secure: false }
        );
        assert_eq!(
            Endpoint::parse("HTTPS://s3.example.com/"),
            Endpoint { host: "s3.example.com".to_string(), secure: true }
        );
        assert_eq!(
            Endpoint::parse("fra1.digitaloceanspaces.com"),
            Endpoint { host: "fra1.digitaloceanspaces.com".to_string(), secure: true }
        );
    }

    #[test]
    fn test_url_rebuilds_scheme() {
        assert_eq!(Endpoint::parse("http://minio:9000").url(), "http://minio:9000");
        assert_eq!(Endpoint::parse("s3.example.com").url(), "https://s3.example.com");
    }
}
