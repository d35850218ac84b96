use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::process::Stdio;

use super::{required, Capability, CapabilityError, CapabilityParams};

pub const DEFAULT_PROGRAM: &str = "yt-dlp";
pub const DEFAULT_FORMAT: &str = "best[ext=mp4]";

/// Resolves a page URL to a direct media link by running an external extractor.
///
/// The extractor is spawned without a shell as `<program> -g -f <format> <url>` and killed if the
/// request is dropped.
#[derive(Debug, Clone)]
pub struct VideoLinkResolver {
    program: String,
    format: String,
}

impl Default for VideoLinkResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, DEFAULT_FORMAT)
    }
}

impl VideoLinkResolver {
    pub fn new(program: impl Into<String>, format: impl Into<String>) -> Self {
        Self { program: program.into(), format: format.into() }
    }

    fn validate_url(url: &str) -> Result<(), CapabilityError> {
        let lower = url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(CapabilityError::InvalidParam {
                name: "url",
                reason: "must be an http(s) URL".into(),
            });
        }
        if url.chars().any(char::is_whitespace) {
            return Err(CapabilityError::InvalidParam {
                name: "url",
                reason: "must not contain whitespace".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for VideoLinkResolver {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn invoke(&self, params: &CapabilityParams) -> Result<JsonValue, CapabilityError> {
        let url = required(params, "url")?;
        Self::validate_url(url)?;

        let output = tokio::process::Command::new(&self.program)
            .arg("-g")
            .arg("-f")
            .arg(&self.format)
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CapabilityError::Unavailable(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no output").trim().to_owned();
            return Err(CapabilityError::Upstream(format!(
                "{} exited with {}: {detail}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let link = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| CapabilityError::Upstream(format!("{} printed no link", self.program)))?;
        Ok(json!({ "link": link }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(url: &str) -> CapabilityParams {
        CapabilityParams::from([("url".to_string(), url.to_string())])
    }

    #[tokio::test]
    async fn rejects_missing_and_non_http_urls() {
        let resolver = VideoLinkResolver::default();
        let err = resolver.invoke(&CapabilityParams::new()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::MissingParam("url")));

        let err = resolver.invoke(&params("file:///etc/passwd")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidParam { name: "url", .. }));

        let err = resolver.invoke(&params("https://a.b/ x")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidParam { name: "url", .. }));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let resolver = VideoLinkResolver::new("keygate-no-such-extractor", DEFAULT_FORMAT);
        let err = resolver.invoke(&params("https://example.com/v")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn returns_first_line_printed_by_the_extractor() {
        // `echo -g -f <format> -- <url>` prints its arguments, which is enough to check wiring.
        let resolver = VideoLinkResolver::new("echo", "mp4");
        let out = resolver.invoke(&params("https://example.com/v")).await.unwrap();
        assert_eq!(out["link"], "-g -f mp4 -- https://example.com/v");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_extractor_is_an_upstream_error() {
        let resolver = VideoLinkResolver::new("false", DEFAULT_FORMAT);
        let err = resolver.invoke(&params("https://example.com/v")).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Upstream(_)));
    }
}
