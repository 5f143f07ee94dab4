//! Web origins and the secure-context check.

use url::Url;

/// A web origin (scheme + host + port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A tuple origin (scheme, host, port).
    Tuple {
        scheme: String,
        host: String,
        port: Option<u16>,
    },
    /// An opaque origin (unique, cannot match anything).
    Opaque(String),
}

impl Origin {
    /// Create an origin from a URL.
    pub fn from_url(url: &Url) -> Self {
        match url.scheme() {
            "http" | "https" => Origin::Tuple {
                scheme: url.scheme().to_string(),
                host: url.host_str().unwrap_or("").to_ascii_lowercase(),
                port: url.port_or_known_default(),
            },
            _ => Origin::Opaque(url.to_string()),
        }
    }

    /// Check if two origins are the same.
    pub fn same_origin(&self, other: &Origin) -> bool {
        match (self, other) {
            (
                Origin::Tuple { scheme: s1, host: h1, port: p1 },
                Origin::Tuple { scheme: s2, host: h2, port: p2 },
            ) => s1 == s2 && h1 == h2 && p1 == p2,
            // Opaque origins are never same-origin (even with themselves)
            _ => false,
        }
    }

    /// Check if a URL belongs to this origin.
    pub fn contains(&self, url: &Url) -> bool {
        self.same_origin(&Origin::from_url(url))
    }

    /// Check if this is a potentially trustworthy origin (HTTPS or loopback).
    ///
    /// Service workers may only be registered for these.
    pub fn is_secure(&self) -> bool {
        match self {
            Origin::Tuple { scheme, host, .. } => {
                scheme == "https"
                    || host == "localhost"
                    || host == "127.0.0.1"
                    || host == "[::1]"
                    || host.ends_with(".localhost")
            }
            Origin::Opaque(_) => false,
        }
    }

    /// Serialize to string (for the Origin header).
    pub fn serialize(&self) -> String {
        match self {
            Origin::Tuple { scheme, host, port } => {
                let default_port = match scheme.as_str() {
                    "http" => Some(80),
                    "https" => Some(443),
                    _ => None,
                };
                match port {
                    Some(p) if *port != default_port => format!("{}://{}:{}", scheme, host, p),
                    _ => format!("{}://{}", scheme, host),
                }
            }
            Origin::Opaque(_) => "null".to_string(),
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(url: &str) -> Origin {
        Origin::from_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_origin_from_url() {
        assert_eq!(
            origin("https://Example.com/app/index.html"),
            Origin::Tuple {
                scheme: "https".to_string(),
                host: "example.com".to_string(),
                port: Some(443),
            }
        );
    }

    #[test]
    fn test_origin_same_origin() {
        assert!(origin("https://example.com/a").same_origin(&origin("https://example.com:443/b")));
        assert!(!origin("https://example.com/").same_origin(&origin("http://example.com/")));
        assert!(!origin("https://example.com/").same_origin(&origin("https://cdn.example.com/")));
    }

    #[test]
    fn test_origin_opaque() {
        let data = origin("data:text/plain,hi");
        assert!(!data.same_origin(&data.clone()));
        assert_eq!(data.serialize(), "null");
    }

    #[test]
    fn test_origin_secure() {
        assert!(origin("https://example.com/").is_secure());
        assert!(origin("http://localhost:8080/").is_secure());
        assert!(origin("http://127.0.0.1/").is_secure());
        assert!(!origin("http://example.com/").is_secure());
    }

    #[test]
    fn test_origin_serialize_port() {
        assert_eq!(origin("https://localhost:7233/timer").serialize(), "https://localhost:7233");
        assert_eq!(origin("https://example.com/").serialize(), "https://example.com");
    }
}
