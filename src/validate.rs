use crate::error::PreviewError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Absolute http(s) URL without whitespace, quotes, angle brackets or other
/// characters that never appear unescaped in a pasted link.
const STANDALONE_URL_PATTERN: &str = r#"(?i)^https?://[^\s<>"'`{}|\\^\[\]]+$"#;

fn standalone_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STANDALONE_URL_PATTERN).expect("static URL pattern compiles"))
}

/// Configuration for URL validation
#[derive(Debug, Clone)]
pub struct UrlValidationConfig {
    /// Allowed URL schemes (default: ["http", "https"])
    pub allowed_schemes: HashSet<String>,
    /// Longest URL accepted, in bytes (default: 2048)
    pub max_length: usize,
}

impl Default for UrlValidationConfig {
    fn default() -> Self {
        let mut allowed_schemes = HashSet::new();
        allowed_schemes.insert("http".to_string());
        allowed_schemes.insert("https".to_string());

        Self {
            allowed_schemes,
            max_length: 2048,
        }
    }
}

/// Decides whether a candidate string is a previewable link.
///
/// Two independent checks must both pass: the restrictive character pattern
/// and a syntactic parse with a host.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    config: UrlValidationConfig,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::with_default_config()
    }
}

impl UrlValidator {
    pub fn new(config: UrlValidationConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(UrlValidationConfig::default())
    }

    /// Validates a URL string
    pub fn validate(&self, url_str: &str) -> Result<Url, PreviewError> {
        if url_str.len() > self.config.max_length {
            return Err(PreviewError::InvalidUrl(format!(
                "URL longer than {} bytes",
                self.config.max_length
            )));
        }

        if !standalone_url_regex().is_match(url_str) {
            return Err(PreviewError::InvalidUrl(url_str.to_string()));
        }

        let url = Url::parse(url_str)?;

        if !self.config.allowed_schemes.contains(url.scheme()) {
            return Err(PreviewError::InvalidUrl(format!(
                "scheme not allowed: {}",
                url.scheme()
            )));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(url),
            _ => Err(PreviewError::InvalidUrl("No host in URL".to_string())),
        }
    }

    pub fn is_valid(&self, url_str: &str) -> bool {
        self.validate(url_str).is_ok()
    }
}
