use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use subtle::ConstantTimeEq;
use warp::http::StatusCode;
use warp::Filter;

use super::gateway::{self, Route};
use crate::error::GatewayError;
use crate::hub::{BatchId, Event, GroupName, LabHub};

const PUBLISH_BODY_LIMIT: u64 = 64 * 1024;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Body accepted by the HTTP publish endpoint
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub group: GroupName,
    pub event: Event,
}

/// Every route the gateway serves
pub fn routes(
    hub: Arc<LabHub>,
    publish_api_key: Option<String>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    monitor_websocket_route(hub.clone())
        .or(student_websocket_route(hub.clone()))
        .or(health_check(hub.clone()))
        .or(publish_endpoint(hub, publish_api_key))
}

/// `/ws/monitor/{batch_id}/?token=...`
pub fn monitor_websocket_route(
    hub: Arc<LabHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("ws" / "monitor" / BatchId / ..)
        .and(optional_trailing_slash())
        .and(warp::ws())
        .and(token_query())
        .and(with_hub(hub))
        .map(|batch_id: BatchId, ws: warp::ws::Ws, query: TokenQuery, hub: Arc<LabHub>| {
            ws.on_upgrade(move |websocket| {
                gateway::handle_connection(websocket, hub, Route::Monitor { batch_id }, query.token)
            })
        })
}

/// `/ws/student/?token=...`
pub fn student_websocket_route(
    hub: Arc<LabHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("ws" / "student" / ..)
        .and(optional_trailing_slash())
        .and(warp::ws())
        .and(token_query())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, query: TokenQuery, hub: Arc<LabHub>| {
            ws.on_upgrade(move |websocket| gateway::handle_connection(websocket, hub, Route::Student, query.token))
        })
}

pub fn health_check(
    hub: Arc<LabHub>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_hub(hub))
        .and_then(|hub: Arc<LabHub>| async move {
            let body = serde_json::json!({
                "status": if hub.is_shutting_down() { "shutting_down" } else { "healthy" },
                "service": "lab-gateway",
                "version": env!("CARGO_PKG_VERSION"),
                "connections": hub.registry().connection_count().await,
                "groups": hub.registry().group_count().await,
            });
            Ok::<_, Infallible>(warp::reply::json(&body))
        })
}

/// `POST /internal/publish` for producers running outside this process
pub fn publish_endpoint(
    hub: Arc<LabHub>,
    publish_api_key: Option<String>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let api_key = Arc::new(publish_api_key);

    warp::path!("internal" / "publish")
        .and(warp::post())
        .and(warp::any().map(move || api_key.clone()).and_then(
            |key: Arc<Option<String>>| async move {
                match key.as_ref() {
                    Some(key) => Ok(key.clone()),
                    None => Err(warp::reject::not_found()),
                }
            },
        ))
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::content_length_limit(PUBLISH_BODY_LIMIT))
        .and(warp::body::bytes())
        .and(with_hub(hub))
        .map(
            |expected_key: String, authorization: Option<String>, body: warp::hyper::body::Bytes, hub: Arc<LabHub>| {
                if !bearer_matches(authorization.as_deref(), &expected_key) {
                    return reply(StatusCode::UNAUTHORIZED, serde_json::json!({ "error": "unauthorized" }));
                }

                let request: PublishRequest = match serde_json::from_slice(&body) {
                    Ok(request) => request,
                    Err(e) => {
                        return reply(StatusCode::BAD_REQUEST, serde_json::json!({ "error": e.to_string() }));
                    }
                };

                tracing::debug!(group = %request.group, kind = request.event.kind().as_str(), "Publish request");
                match hub.outbox().emit(request.group, request.event) {
                    Ok(()) => reply(StatusCode::ACCEPTED, serde_json::json!({ "queued": true })),
                    Err(e @ (GatewayError::QueueFull | GatewayError::QueueClosed)) => reply(
                        StatusCode::SERVICE_UNAVAILABLE,
                        serde_json::json!({ "queued": false, "error": e.to_string() }),
                    ),
                    Err(e) => reply(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        serde_json::json!({ "queued": false, "error": e.to_string() }),
                    ),
                }
            },
        )
}

/// Compares the presented bearer key without an early exit on the first differing byte
fn bearer_matches(authorization: Option<&str>, expected_key: &str) -> bool {
    authorization
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|presented| bool::from(presented.as_bytes().ct_eq(expected_key.as_bytes())))
        .unwrap_or(false)
}

fn reply(status: StatusCode, body: serde_json::Value) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&body), status)
}

/// Matches the end of the path with or without a trailing `/`
fn optional_trailing_slash() -> impl Filter<Extract = (), Error = warp::Rejection> + Copy {
    warp::path::tail()
        .and_then(|tail: warp::path::Tail| async move {
            if tail.as_str().is_empty() {
                Ok(())
            } else {
                Err(warp::reject::not_found())
            }
        })
        .untuple_one()
}

/// The token query, treating a missing query string as no token
fn token_query() -> impl Filter<Extract = (TokenQuery,), Error = Infallible> + Clone {
    warp::query::<TokenQuery>()
        .or(warp::any().map(|| TokenQuery { token: None }))
        .unify()
}

fn with_hub(hub: Arc<LabHub>) -> impl Filter<Extract = (Arc<LabHub>,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
