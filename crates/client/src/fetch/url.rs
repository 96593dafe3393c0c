//! Asset URL validation.

/// Why a URL can never be fetched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    Invalid(String),
}

/// Parse an asset URL. Only absolute `http`/`https` URLs are accepted; the
/// fragment is dropped since it never reaches the server.
pub fn parse_asset_url(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = url::Url::parse(trimmed).map_err(|e| UrlError::Invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlError::Invalid("missing host".into()));
    }

    parsed.set_fragment(None);
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_http_and_https() {
        let url = parse_asset_url("  https://assets.example.org/logo.png#top ").unwrap();
        assert_eq!(url.as_str(), "https://assets.example.org/logo.png");

        let url = parse_asset_url("http://127.0.0.1:8080/img?id=3").unwrap();
        assert_eq!(url.query(), Some("id=3"));
    }

    #[test]
    fn test_rejects_unfetchable() {
        assert_eq!(parse_asset_url("   "), Err(UrlError::Empty));
        assert!(matches!(parse_asset_url("file:///etc/passwd"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(parse_asset_url("data:image/png;base64,AAAA"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(parse_asset_url("logo.png"), Err(UrlError::Invalid(_))));
    }
}
