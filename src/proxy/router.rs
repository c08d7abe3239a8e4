//! Interception router for plain-HTTP requests.
//!
//! Only two routes are ever served locally and nothing is proxied upstream
//! over plain HTTP: the browser reaches the outside world through CONNECT
//! tunnels, so anything that is not the challenge page or the result
//! submission gets a 404.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

use super::collector;
use super::page;
use super::session::SessionState;

/// Sentinel host the injected page posts the solved token to. Unroutable on
/// any real network; it only means something inside this proxy.
pub const RESULT_HOST: &str = "captcha-result";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ChallengePage,
    SubmitResult,
    NotFound,
}

/// Handle one intercepted request.
pub async fn handle(
    session: Arc<SessionState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let host = request_host(&req);
    let route = classify_for(&session, req.method(), host.as_deref(), req.uri().path());
    debug!(method = %req.method(), host = ?host, path = req.uri().path(), ?route, "Intercepted request");

    match route {
        Route::ChallengePage => Ok(page::serve(&session).await),
        Route::SubmitResult => collector::collect(&session, req).await,
        Route::NotFound => Ok(empty_response(StatusCode::NOT_FOUND)),
    }
}

/// Classification against a concrete session: the challenge page is bound to
/// the session's target host, the result route to the fixed sentinel host.
pub fn classify_for(
    session: &SessionState,
    method: &Method,
    host: Option<&str>,
    path: &str,
) -> Route {
    let Some(host) = host else {
        return Route::NotFound;
    };

    if host == session.target_host && path == "/" {
        Route::ChallengePage
    } else if host == RESULT_HOST && *method == Method::POST {
        Route::SubmitResult
    } else {
        Route::NotFound
    }
}

/// Requested host: the absolute-form proxy URI when present, otherwise the
/// Host header.
fn request_host(req: &Request<Incoming>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(host.to_string());
    }
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|value| match value.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
            _ => value.to_string(),
        })
}

pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn session() -> SessionState {
        SessionState::new(
            "example.test".to_string(),
            "ABC123".to_string(),
            PathBuf::from("./harvester-body.html"),
        )
    }

    #[test]
    fn test_target_root_routes_to_challenge_page() {
        let session = session();
        let route = classify_for(&session, &Method::GET, Some("example.test"), "/");
        assert_eq!(route, Route::ChallengePage);
    }

    #[test]
    fn test_host_mismatch_is_not_found() {
        let session = session();
        let route = classify_for(&session, &Method::GET, Some("other.test"), "/");
        assert_eq!(route, Route::NotFound);
    }

    #[test]
    fn test_path_mismatch_is_not_found() {
        let session = session();
        let route = classify_for(&session, &Method::GET, Some("example.test"), "/x");
        assert_eq!(route, Route::NotFound);
    }

    #[test]
    fn test_result_host_post_routes_to_collector() {
        let session = session();
        let route = classify_for(&session, &Method::POST, Some(RESULT_HOST), "/");
        assert_eq!(route, Route::SubmitResult);

        // Any path works on the sentinel host.
        let route = classify_for(&session, &Method::POST, Some(RESULT_HOST), "/anything");
        assert_eq!(route, Route::SubmitResult);
    }

    #[test]
    fn test_get_to_result_host_is_not_found() {
        let session = session();
        let route = classify_for(&session, &Method::GET, Some(RESULT_HOST), "/");
        assert_eq!(route, Route::NotFound);
    }

    #[test]
    fn test_missing_host_is_not_found() {
        let session = session();
        assert_eq!(
            classify_for(&session, &Method::GET, None, "/"),
            Route::NotFound
        );
    }
}
