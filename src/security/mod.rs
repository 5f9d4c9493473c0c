//! Request validation before any network or queue resource is spent.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → auth token check (when enabled)
//!     → URL shape, scheme and length checks
//!     → host blocklist and private-range rejection (SSRF)
//!     → only then: admission and provider calls
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any check failure
//! - Resolved share links are re-validated like user input; upstream
//!   responses are not trusted either

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::config::SecurityConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct SecurityValidator {
    max_url_length: usize,
    min_token_length: usize,
    blocked_hosts: Vec<String>,
}

impl SecurityValidator {
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            max_url_length: config.max_url_length,
            min_token_length: config.min_token_length,
            blocked_hosts: config
                .blocked_hosts
                .iter()
                .map(|host| host.to_lowercase())
                .collect(),
        }
    }

    /// Validate a candidate video URL and return its parsed form.
    pub fn validate_url(&self, raw: &str) -> Result<Url, PipelineError> {
        if raw.len() > self.max_url_length {
            return Err(PipelineError::InvalidVideoUrl(format!(
                "url exceeds maximum length of {} bytes",
                self.max_url_length
            )));
        }

        let url = Url::parse(raw)
            .map_err(|err| PipelineError::InvalidVideoUrl(format!("{raw}: {err}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PipelineError::InvalidVideoUrl(format!(
                    "scheme '{other}' is not allowed"
                )))
            }
        }

        let Some(host) = url.host() else {
            return Err(PipelineError::InvalidVideoUrl("url has no host".into()));
        };

        match host {
            Host::Domain(domain) => {
                let domain = domain.to_lowercase();
                if self.blocked_hosts.iter().any(|blocked| *blocked == domain) {
                    return Err(PipelineError::InvalidVideoUrl(format!(
                        "host '{domain}' is blocked"
                    )));
                }
            }
            Host::Ipv4(addr) => {
                if is_forbidden_v4(addr) || self.is_blocked_literal(&addr.to_string()) {
                    return Err(PipelineError::InvalidVideoUrl(format!(
                        "address '{addr}' is not allowed"
                    )));
                }
            }
            Host::Ipv6(addr) => {
                if is_forbidden_v6(addr) || self.is_blocked_literal(&addr.to_string()) {
                    return Err(PipelineError::InvalidVideoUrl(format!(
                        "address '{addr}' is not allowed"
                    )));
                }
            }
        }

        Ok(url)
    }

    /// Check the `Authorization` header when token auth is enabled.
    pub fn validate_auth_header(&self, header: Option<&str>) -> Result<(), PipelineError> {
        let Some(value) = header else {
            return Err(PipelineError::Unauthorized(
                "missing Authorization header".into(),
            ));
        };
        let Some(token) = value.strip_prefix("Bearer ") else {
            return Err(PipelineError::Unauthorized(
                "Authorization header is not a Bearer token".into(),
            ));
        };
        if token.trim().len() < self.min_token_length {
            return Err(PipelineError::Unauthorized("token is too short".into()));
        }
        Ok(())
    }

    fn is_blocked_literal(&self, addr: &str) -> bool {
        self.blocked_hosts.iter().any(|blocked| blocked == addr)
    }
}

fn is_forbidden_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
}

fn is_forbidden_v6(addr: Ipv6Addr) -> bool {
    // fc00::/7 unique local, fe80::/10 link local
    let segments = addr.segments();
    addr.is_loopback()
        || addr.is_unspecified()
        || (segments[0] & 0xfe00) == 0xfc00
        || (segments[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SecurityValidator {
        SecurityValidator::from_config(&SecurityConfig::default())
    }

    #[test]
    fn accepts_public_video_urls() {
        let v = validator();
        assert!(v.validate_url("https://v.douyin.com/iAbCdE/").is_ok());
        assert!(v.validate_url("http://cdn.example.com/a.mp4").is_ok());
    }

    #[test]
    fn rejects_metadata_and_private_addresses() {
        let v = validator();
        assert!(v.validate_url("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(v.validate_url("http://10.0.0.8/internal.mp4").is_err());
        assert!(v.validate_url("http://192.168.1.1/").is_err());
        assert!(v.validate_url("http://127.0.0.1:8080/x").is_err());
        assert!(v.validate_url("http://[::1]/x").is_err());
        assert!(v.validate_url("http://[fd00::1]/x").is_err());
    }

    #[test]
    fn rejects_blocked_hosts_case_insensitively() {
        let v = validator();
        assert!(v.validate_url("http://Metadata.Google.Internal/computeMetadata").is_err());
        assert!(v.validate_url("http://localhost/video.mp4").is_err());
    }

    #[test]
    fn rejects_bad_schemes_and_oversized_urls() {
        let v = validator();
        assert!(v.validate_url("ftp://example.com/a.mp4").is_err());
        assert!(v.validate_url("file:///etc/passwd").is_err());

        let huge = format!("https://example.com/{}", "a".repeat(3000));
        assert!(v.validate_url(&huge).is_err());
    }

    #[test]
    fn auth_header_rules() {
        let v = validator();
        assert!(v.validate_auth_header(None).is_err());
        assert!(v.validate_auth_header(Some("Basic abc")).is_err());
        assert!(v.validate_auth_header(Some("Bearer short")).is_err());
        let token = format!("Bearer {}", "t".repeat(32));
        assert!(v.validate_auth_header(Some(&token)).is_ok());
    }
}
