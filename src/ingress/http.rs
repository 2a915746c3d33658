//! The HTTP surface for vote ingress (spec.md §6): `POST /vote`, a
//! liveness `GET /`, a remote-address deny-list, and permissive CORS so
//! that browser-based voting clients can submit directly.

use {
  super::ingest,
  crate::{error::IngestStatus, runtime::Runtime, wire::VoteSubmission},
  axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
  },
  std::{net::SocketAddr, sync::Arc},
};

pub fn router(runtime: Arc<Runtime>) -> Router {
  Router::new()
    .route("/", get(health))
    .route("/vote", post(submit_vote))
    .layer(Extension(runtime))
}

async fn health() -> &'static str {
  "ok"
}

async fn submit_vote(
  Extension(runtime): Extension<Arc<Runtime>>,
  ConnectInfo(remote): ConnectInfo<SocketAddr>,
  Json(submission): Json<VoteSubmission>,
) -> Response {
  if runtime.config.deny_list.contains(&remote.ip()) {
    return with_cors((StatusCode::FORBIDDEN, "remote address is denied").into_response());
  }

  let status = ingest(&runtime, submission).await;
  let response = match status {
    IngestStatus::Accepted => (StatusCode::OK, "accepted").into_response(),
    IngestStatus::UserError => (StatusCode::BAD_REQUEST, "vote rejected").into_response(),
    IngestStatus::NodeError => {
      (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
  };
  with_cors(response)
}

fn with_cors(mut response: Response) -> Response {
  response
    .headers_mut()
    .insert("access-control-allow-origin", HeaderValue::from_static("*"));
  response
}
