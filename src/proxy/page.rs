//! Challenge page delivery.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::io;
use std::path::Path;
use tracing::error;

use super::router::empty_response;
use super::session::SessionState;

/// Placeholder token substituted with the session's site key.
pub const SITEKEY_PLACEHOLDER: &str = "{{SITEKEY}}";

/// Serve the injected challenge page. The template is read fresh on every
/// request; this route is hit once per session, so there is nothing to cache.
/// A missing or unreadable template becomes a logged 500, keeping the
/// listener up.
pub async fn serve(session: &SessionState) -> Response<Full<Bytes>> {
    match render(&session.template_path, &session.site_key).await {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
            response
        }
        Err(e) => {
            error!(
                template = %session.template_path.display(),
                "Failed reading challenge page template: {}",
                e
            );
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Read the template and substitute every occurrence of the placeholder.
pub async fn render(template_path: &Path, site_key: &str) -> io::Result<String> {
    let template = tokio::fs::read_to_string(template_path).await?;
    Ok(template.replace(SITEKEY_PLACEHOLDER, site_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_render_substitutes_every_occurrence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "<div data-sitekey=\"{{{{SITEKEY}}}}\"></div><span>{{{{SITEKEY}}}}</span>"
        )
        .unwrap();

        let body = render(file.path(), "ABC123").await.unwrap();
        assert_eq!(body.matches("ABC123").count(), 2);
        assert!(!body.contains(SITEKEY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_render_missing_template_is_io_error() {
        let result = render(Path::new("./does-not-exist.html"), "ABC123").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_converts_read_failure_to_500() {
        let session = SessionState::new(
            "example.test".to_string(),
            "ABC123".to_string(),
            "./does-not-exist.html".into(),
        );

        let response = serve(&session).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
