//! In-process imitation of the Geocaching API endpoints the client reads.
//!
//! Serves `/v1/users/me`, `/v1/trackables` and
//! `/v1/trackables/{code}/journeys`, honours `fields` projections and the
//! `expand=trackablelogs:N` option, and checks the bearer token. Tests can
//! queue faults (forced status codes, empty 204 answers, delays) that are
//! consumed one per request, before normal handling.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

/// One injected misbehaviour, consumed by the next request.
#[derive(Clone, Debug, PartialEq)]
pub enum Fault {
    /// Answer with this status and a JSON error document.
    Status(u16),
    /// Answer with this status and a plain-text body.
    Text(u16, String),
    /// Answer 204 with no body.
    NoContent,
    /// Wait this long, then handle the request normally.
    Delay(Duration),
}

/// A request as the server saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub uri: String,
    pub authorization: Option<String>,
}

#[derive(Debug, Default)]
struct MockData {
    token: String,
    user: Map<String, Value>,
    trackables: Vec<Map<String, Value>>,
    journeys: HashMap<String, Vec<Value>>,
    faults: VecDeque<Fault>,
    requests: Vec<RecordedRequest>,
}

/// Shared, cloneable handle to the server's data.
///
/// Uses a std mutex so tests can seed data and queue faults from plain
/// threads as well as from async tests; the lock is never held across an
/// `.await`.
#[derive(Clone, Debug, Default)]
pub struct MockState(Arc<Mutex<MockData>>);

impl MockState {
    /// Empty account that accepts `token` as bearer token.
    pub fn new(token: &str) -> Self {
        let state = Self::default();
        state.lock().token = token.to_string();
        state
    }

    /// A small account with two trackables, used by the standalone binary.
    pub fn demo(token: &str) -> Self {
        let state = Self::new(token);
        state.set_user(json!({
            "referenceCode": "PR1A2B3",
            "username": "demo-cacher",
            "findCount": 1204,
            "hideCount": 12,
            "favoritePoints": 88,
            "souvenirCount": 31,
            "awardedFavoritePoints": 140,
            "membershipLevelId": 3
        }));
        state.add_trackable(json!({
            "referenceCode": "TB100A",
            "name": "Rubber Duck",
            "holder": null,
            "trackingNumber": "QX7Y2K",
            "kilometersTraveled": 1532.4,
            "milesTraveled": 952.2,
            "currentGeocacheCode": "GC8ABC",
            "currentGeocacheName": "Windmill View",
            "isMissing": false,
            "type": "Travel Bug Dog Tag",
            "trackableLogs": [{
                "referenceCode": "TL9ZZ1",
                "owner": {"referenceCode": "PR7Q", "username": "mover"},
                "text": "Dropped at the windmill",
                "trackableLogType": {"id": 14, "name": "Dropped Off"},
                "loggedDate": "2023-06-01T14:30:00.000"
            }]
        }));
        state.add_trackable(json!({
            "referenceCode": "TB200B",
            "name": "Lost Compass",
            "holder": {"referenceCode": "PR7Q", "username": "mover"},
            "isMissing": true,
            "type": "Geocoin"
        }));
        state.add_journey("TB100A", json!({
            "coordinates": {"latitude": 52.3731, "longitude": 4.8922},
            "loggedDate": "2023-06-01T14:30:00.000"
        }));
        state.add_journey("TB100A", json!({
            "coordinates": {"latitude": 51.9225, "longitude": 4.4792},
            "loggedDate": "2023-05-12T09:00:00.000"
        }));
        state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockData> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_user(&self, user: Value) {
        self.lock().user = user.as_object().cloned().unwrap_or_default();
    }

    /// Add a trackable record, replacing one with the same reference code.
    pub fn add_trackable(&self, trackable: Value) {
        let Some(record) = trackable.as_object().cloned() else {
            return;
        };
        let mut data = self.lock();
        let code = record.get("referenceCode").cloned();
        data.trackables.retain(|existing| existing.get("referenceCode") != code.as_ref());
        data.trackables.push(record);
    }

    pub fn add_journey(&self, reference_code: &str, journey: Value) {
        self.lock()
            .journeys
            .entry(reference_code.to_string())
            .or_default()
            .push(journey);
    }

    pub fn push_fault(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

pub fn app(state: MockState) -> Router {
    Router::new()
        .route("/v1/users/me", get(get_user))
        .route("/v1/trackables", get(list_trackables))
        .route("/v1/trackables/{code}/journeys", get(list_journeys))
        .with_state(state)
}

pub async fn run(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"statusCode": status.as_u16(), "errorMessage": message})),
    )
        .into_response()
}

/// Record the request, apply a queued fault and check the bearer token.
/// Returns the response to send instead of normal handling, if any.
async fn gate(state: &MockState, uri: &OriginalUri, headers: &HeaderMap) -> Option<Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let (fault, token) = {
        let mut data = state.lock();
        data.requests.push(RecordedRequest {
            uri: uri.0.to_string(),
            authorization: authorization.clone(),
        });
        (data.faults.pop_front(), data.token.clone())
    };

    match fault {
        Some(Fault::Status(code)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Some(error(status, "injected fault"));
        }
        Some(Fault::Text(code, body)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return Some((status, [(header::CONTENT_TYPE, "text/plain")], body).into_response());
        }
        Some(Fault::NoContent) => return Some(StatusCode::NO_CONTENT.into_response()),
        Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
        None => {}
    }

    if authorization.as_deref() != Some(format!("Bearer {token}").as_str()) {
        return Some(error(StatusCode::UNAUTHORIZED, "invalid bearer token"));
    }
    None
}

/// Keep only the comma-separated `fields`, or everything when absent.
fn project(record: &Map<String, Value>, fields: Option<&String>) -> Map<String, Value> {
    match fields {
        None => record.clone(),
        Some(list) => list
            .split(',')
            .filter_map(|field| record.get(field).map(|value| (field.to_string(), value.clone())))
            .collect(),
    }
}

async fn get_user(
    State(state): State<MockState>,
    uri: OriginalUri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = gate(&state, &uri, &headers).await {
        return rejection;
    }
    let user = state.lock().user.clone();
    Json(Value::Object(project(&user, params.get("fields")))).into_response()
}

async fn list_trackables(
    State(state): State<MockState>,
    uri: OriginalUri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = gate(&state, &uri, &headers).await {
        return rejection;
    }
    let wanted: Option<Vec<&str>> = params
        .get("referenceCodes")
        .map(|codes| codes.split(',').filter(|c| !c.is_empty()).collect());
    let log_limit = params
        .get("expand")
        .and_then(|expand| expand.strip_prefix("trackablelogs:"))
        .and_then(|n| n.parse::<usize>().ok());

    let trackables = state.lock().trackables.clone();
    let records: Vec<Value> = trackables
        .iter()
        .filter(|record| match (&wanted, record.get("referenceCode").and_then(Value::as_str)) {
            (Some(codes), Some(code)) => codes.contains(&code),
            (None, _) => true,
            (Some(_), None) => false,
        })
        .map(|record| {
            let mut projected = project(record, params.get("fields"));
            if let Some(limit) = log_limit {
                let logs = record
                    .get("trackableLogs")
                    .and_then(Value::as_array)
                    .map(|logs| logs.iter().take(limit).cloned().collect())
                    .unwrap_or_default();
                projected.insert("trackableLogs".to_string(), Value::Array(logs));
            }
            Value::Object(projected)
        })
        .collect();
    Json(records).into_response()
}

async fn list_journeys(
    State(state): State<MockState>,
    Path(code): Path<String>,
    uri: OriginalUri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(rejection) = gate(&state, &uri, &headers).await {
        return rejection;
    }
    let (known, mut journeys) = {
        let data = state.lock();
        let known = data.trackables.iter().any(|record| {
            record.get("referenceCode").and_then(Value::as_str) == Some(code.as_str())
        });
        (known, data.journeys.get(&code).cloned().unwrap_or_default())
    };
    if !known {
        return error(StatusCode::NOT_FOUND, "trackable not found");
    }

    let logged = |journey: &Value| {
        journey
            .get("loggedDate")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    match params.get("sort").map(String::as_str) {
        Some("loggedDate-") => journeys.sort_by_key(|j| std::cmp::Reverse(logged(j))),
        Some("loggedDate+") | Some("loggedDate") => journeys.sort_by_key(logged),
        _ => {}
    }
    if let Some(take) = params.get("take").and_then(|n| n.parse::<usize>().ok()) {
        journeys.truncate(take);
    }
    Json(journeys).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_keeps_requested_fields_only() {
        let record = json!({"a": 1, "b": 2, "c": 3});
        let projected = project(record.as_object().unwrap(), Some(&"a,c,z".to_string()));
        assert_eq!(Value::Object(projected), json!({"a": 1, "c": 3}));
    }

    #[test]
    fn projection_without_fields_keeps_everything() {
        let record = json!({"a": 1, "b": 2});
        let projected = project(record.as_object().unwrap(), None);
        assert_eq!(Value::Object(projected), record);
    }

    #[test]
    fn add_trackable_replaces_same_code() {
        let state = MockState::new("t");
        state.add_trackable(json!({"referenceCode": "TB1", "name": "old"}));
        state.add_trackable(json!({"referenceCode": "TB1", "name": "new"}));
        let data = state.lock();
        assert_eq!(data.trackables.len(), 1);
        assert_eq!(data.trackables[0]["name"], "new");
    }

    #[test]
    fn demo_state_has_user_and_trackables() {
        let state = MockState::demo("t");
        let data = state.lock();
        assert_eq!(data.user["username"], "demo-cacher");
        assert_eq!(data.trackables.len(), 2);
        assert_eq!(data.journeys["TB100A"].len(), 2);
    }
}
