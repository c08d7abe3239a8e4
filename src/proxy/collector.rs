//! Result collection.
//!
//! The sentinel hostname is the only authentication: it is unroutable outside
//! this proxy's own interception, which is adequate only in the documented
//! single-user, localhost-only threat model. No size limit, no content-type
//! checks.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::info;

use super::router::empty_response;
use super::session::SessionState;

/// Accumulate the posted body into one token string, in arrival order, and
/// commit it to the session's result slot once the stream ends.
pub async fn collect(
    session: &Arc<SessionState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let token = accumulate(req.into_body()).await?;
    info!(bytes = token.len(), "Captured challenge token");
    session.commit_result(token);
    Ok(empty_response(StatusCode::OK))
}

/// Concatenate data frames as they arrive. Chunk boundaries carry no meaning;
/// only the byte order does.
pub async fn accumulate<B>(mut body: B) -> Result<String, B::Error>
where
    B: Body<Data = Bytes> + Unpin,
{
    let mut token = String::new();
    while let Some(frame) = body.frame().await {
        if let Some(chunk) = frame?.data_ref() {
            token.push_str(&String::from_utf8_lossy(chunk));
        }
    }
    Ok(token)
}
