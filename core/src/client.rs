//! Authenticated request execution against the Geocaching API.
//!
//! # Design
//! A request goes through three steps. `build_request` turns a relative path
//! into an absolute, authorized `HttpRequest`. The `Transport` performs the
//! round-trip. `classify_response` turns the `HttpResponse` into a body or a
//! typed error. The first and last steps are pure; `execute` wraps the whole
//! attempt in two retry layers, one for transport failures and one for rate
//! limiting, each with its own budget.
//!
//! The client owns the transport it creates (lazily, on first use) and
//! releases it on `close` or drop. A transport handed in by the caller is
//! shared, never released.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{ClientBuilder, Sleeper, TokenRefresh};
use crate::environment::EnvironmentSettings;
use crate::error::{GeocachingError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError, UreqTransport};
use crate::retry::{with_retry, BackoffPolicy};
use crate::settings::Settings;
use crate::types::Status;

/// Extra request data supplied by the caller of `execute`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn into_json(self) -> Result<Value> {
        match self {
            ResponseBody::Json(value) => Ok(value),
            ResponseBody::Text(text) => Err(GeocachingError::Deserialization(format!(
                "expected a JSON response, got text: {text}"
            ))),
        }
    }
}

enum TransportSlot {
    Owned(Option<UreqTransport>),
    External(Arc<dyn Transport>),
}

/// Blocking client for the Geocaching API.
///
/// Holds the account `Status`, which `update` refreshes in place.
pub struct GeocachingClient {
    pub(crate) endpoint: EnvironmentSettings,
    token: String,
    token_refresh: Option<Arc<dyn TokenRefresh>>,
    request_timeout: Duration,
    transport: TransportSlot,
    connection_retry: BackoffPolicy,
    rate_limit_retry: BackoffPolicy,
    sleeper: Sleeper,
    pub(crate) settings: Settings,
    pub(crate) status: Status,
}

impl fmt::Debug for GeocachingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocachingClient")
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .field("settings", &self.settings)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl GeocachingClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_builder(builder: ClientBuilder) -> Self {
        let endpoint = builder
            .environment_settings
            .unwrap_or_else(|| builder.environment.settings());
        let transport = match builder.transport {
            Some(shared) => TransportSlot::External(shared),
            None => TransportSlot::Owned(None),
        };
        Self {
            endpoint,
            token: builder.token.unwrap_or_default(),
            token_refresh: builder.token_refresh,
            request_timeout: builder.request_timeout,
            transport,
            connection_retry: builder.connection_retry,
            rate_limit_retry: builder.rate_limit_retry,
            sleeper: builder.sleeper,
            settings: builder.settings,
            status: Status::new(),
        }
    }

    pub fn endpoint(&self) -> &EnvironmentSettings {
        &self.endpoint
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Build the request for `relative` with the currently held token.
    ///
    /// Caller headers are kept, except any `Authorization` header, which is
    /// replaced by the bearer token.
    pub fn build_request(
        &self,
        method: HttpMethod,
        relative: &str,
        options: &RequestOptions,
    ) -> HttpRequest {
        let mut headers: Vec<(String, String)> = options
            .headers
            .iter()
            .filter(|(key, _)| !key.eq_ignore_ascii_case("authorization"))
            .cloned()
            .collect();
        headers.push(("Authorization".to_string(), format!("Bearer {}", self.token)));
        HttpRequest {
            method,
            url: self.endpoint.url_for(relative),
            headers,
            body: options.body.clone(),
        }
    }

    /// Run one request with retries and return its decoded body.
    ///
    /// `Ok(None)` means the server answered 204 No Content.
    ///
    /// The rate-limit policy runs inside the connection policy, so each
    /// connection attempt starts a fresh rate-limit budget. With the defaults a
    /// single call makes at most 3 x 6 = 18 attempts.
    pub fn execute(
        &mut self,
        method: HttpMethod,
        relative: &str,
        options: &RequestOptions,
    ) -> Result<Option<ResponseBody>> {
        let connection = self.connection_retry;
        let rate_limit = self.rate_limit_retry;
        let sleeper = Arc::clone(&self.sleeper);

        with_retry(&connection, GeocachingError::is_connection, &*sleeper, || {
            with_retry(&rate_limit, GeocachingError::is_rate_limit, &*sleeper, || {
                self.attempt(method, relative, options)
            })
        })
    }

    fn attempt(
        &mut self,
        method: HttpMethod,
        relative: &str,
        options: &RequestOptions,
    ) -> Result<Option<ResponseBody>> {
        if let Some(refresh) = &self.token_refresh {
            self.token = refresh.refresh().map_err(|err| match err {
                GeocachingError::TokenRefresh(_) => err,
                other => GeocachingError::TokenRefresh(other.to_string()),
            })?;
        }

        let request = self.build_request(method, relative, options);
        tracing::debug!(
            method = method.as_str(),
            url = %request.url,
            "sending Geocaching API request"
        );

        let timeout = self.request_timeout;
        let response = self
            .transport()
            .send(&request, timeout)
            .map_err(|err| match err {
                TransportError::Timeout => GeocachingError::ConnectionTimeout,
                TransportError::Connect(message) => GeocachingError::Connection(message),
                TransportError::InvalidRequest(message) => GeocachingError::InvalidRequest(message),
            })?;
        tracing::debug!(
            status = response.status,
            url = %request.url,
            "received Geocaching API response"
        );

        classify_response(response)
    }

    fn transport(&mut self) -> &dyn Transport {
        match &mut self.transport {
            TransportSlot::Owned(slot) => slot.get_or_insert_with(|| {
                tracing::debug!("opening HTTP agent");
                UreqTransport::new()
            }),
            TransportSlot::External(shared) => &**shared,
        }
    }

    /// Whether a transport is currently available without creating one.
    pub fn is_open(&self) -> bool {
        match &self.transport {
            TransportSlot::Owned(slot) => slot.is_some(),
            TransportSlot::External(_) => true,
        }
    }

    /// Release the internally created transport. A caller-supplied transport
    /// is left untouched. Calling this more than once is harmless; a later
    /// request opens a new transport.
    pub fn close(&mut self) {
        if let TransportSlot::Owned(slot) = &mut self.transport {
            if slot.take().is_some() {
                tracing::debug!("closed HTTP agent");
            }
        }
    }
}

/// Map an `HttpResponse` to a body or an error.
///
/// 429 is always `RateLimit`, whatever the body says. Other 4xx/5xx become
/// `Api` with the JSON error document, or the raw text wrapped as
/// `{"message": ...}`. 204 yields `None` without looking at the body.
pub fn classify_response(response: HttpResponse) -> Result<Option<ResponseBody>> {
    match response.status {
        429 => Err(GeocachingError::RateLimit),
        status @ 400..=599 => Err(GeocachingError::Api {
            status,
            body: error_body(&response),
        }),
        204 => {
            tracing::warn!(
                "Geocaching API returned 204 No Content; upstream data may be missing or stale"
            );
            Ok(None)
        }
        _ if response.is_json() => serde_json::from_str(&response.body)
            .map(|value| Some(ResponseBody::Json(value)))
            .map_err(|e| GeocachingError::Deserialization(e.to_string())),
        _ => Ok(Some(ResponseBody::Text(response.body))),
    }
}

fn error_body(response: &HttpResponse) -> Value {
    if response.is_json() {
        if let Ok(value) = serde_json::from_str(&response.body) {
            return value;
        }
    }
    json!({ "message": response.body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::testing::{json_response, text_response, ScriptedTransport};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn client_with(transport: Arc<ScriptedTransport>) -> GeocachingClient {
        GeocachingClient::builder()
            .token("secret")
            .environment(Environment::Staging)
            .transport(transport)
            .connection_retry(BackoffPolicy::immediate(3))
            .rate_limit_retry(BackoffPolicy::immediate(6))
            .build()
            .unwrap()
    }

    fn response(status: u16, content_type: &str, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.to_string(),
        }
    }

    #[test]
    fn build_request_injects_bearer_token() {
        let client = client_with(ScriptedTransport::new(vec![]));
        let options = RequestOptions {
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("authorization".to_string(), "Basic abc".to_string()),
            ],
            body: None,
        };
        let req = client.build_request(HttpMethod::Get, "/v1/users/me?fields=username", &options);
        assert_eq!(req.url, "https://staging.api.groundspeak.com/v1/users/me?fields=username");
        assert_eq!(req.header("accept"), Some("application/json"));
        assert_eq!(req.header("authorization"), Some("Bearer secret"));
        assert_eq!(req.headers.len(), 2);
    }

    #[test]
    fn classify_429_is_rate_limit_even_with_json_body() {
        let body = r#"{"message":"slow down"}"#;
        let err = classify_response(response(429, "application/json", body)).unwrap_err();
        assert!(matches!(err, GeocachingError::RateLimit));
    }

    #[test]
    fn classify_json_error_body() {
        let body = r#"{"statusCode":404,"errorMessage":"nope"}"#;
        let err = classify_response(response(404, "application/json", body)).unwrap_err();
        match err {
            GeocachingError::Api { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body["errorMessage"], "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn classify_text_error_body_is_wrapped() {
        let err = classify_response(response(502, "text/html", "Bad gateway")).unwrap_err();
        match err {
            GeocachingError::Api { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, json!({"message": "Bad gateway"}));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn classify_malformed_json_error_body_is_wrapped() {
        let err = classify_response(response(500, "application/json", "oops")).unwrap_err();
        assert!(matches!(
            err,
            GeocachingError::Api { status: 500, ref body } if body["message"] == "oops"
        ));
    }

    #[test]
    fn classify_204_is_empty_without_parsing() {
        let result =
            classify_response(response(204, "application/json", "not json at all")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn classify_success_bodies() {
        let json =
            classify_response(response(200, "application/json; charset=utf-8", r#"{"a":1}"#))
                .unwrap();
        assert_eq!(json, Some(ResponseBody::Json(json!({"a": 1}))));
        let text = classify_response(response(200, "text/plain", "hello")).unwrap();
        assert_eq!(text, Some(ResponseBody::Text("hello".to_string())));
        let bad = classify_response(response(200, "application/json", "{")).unwrap_err();
        assert!(matches!(bad, GeocachingError::Deserialization(_)));
    }

    #[test]
    fn text_body_is_not_json() {
        let err = ResponseBody::Text("hi".into()).into_json().unwrap_err();
        assert!(matches!(err, GeocachingError::Deserialization(_)));
    }

    #[test]
    fn connection_errors_retry_until_success() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Timeout),
            Ok(json_response(200, json!({"ok": true}))),
        ]);
        let mut client = client_with(transport.clone());
        let body = client
            .execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default())
            .unwrap();
        assert_eq!(body, Some(ResponseBody::Json(json!({"ok": true}))));
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn connection_errors_exhaust_after_three_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Ok(json_response(200, json!({}))),
        ]);
        let mut client = client_with(transport.clone());
        let err = client
            .execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default())
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn invalid_request_is_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::InvalidRequest("http: invalid uri character".into())),
            Ok(json_response(200, json!({}))),
        ]);
        let mut client = client_with(transport.clone());
        let err = client
            .execute(HttpMethod::Get, "/v1/trackables/TB 1/journeys", &RequestOptions::default())
            .unwrap_err();
        assert!(matches!(err, GeocachingError::InvalidRequest(_)), "got {err:?}");
        assert!(!err.is_retryable());
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn rate_limit_exhausts_after_six_attempts() {
        let script = (0..10).map(|_| Ok(json_response(429, json!({"message": "slow"})))).collect();
        let transport = ScriptedTransport::new(script);
        let mut client = client_with(transport.clone());
        let err = client
            .execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default())
            .unwrap_err();
        assert!(matches!(err, GeocachingError::RateLimit));
        assert_eq!(transport.request_count(), 6);
    }

    #[test]
    fn connection_error_starts_a_fresh_rate_limit_budget() {
        let mut script: Vec<_> = (0..5).map(|_| Ok(json_response(429, json!({})))).collect();
        script.push(Err(TransportError::Connect("reset".into())));
        script.extend((0..6).map(|_| Ok(json_response(429, json!({})))));
        script.push(Ok(json_response(200, json!({"ok": true}))));
        let transport = ScriptedTransport::new(script);
        let mut client = client_with(transport.clone());
        let err = client
            .execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default())
            .unwrap_err();
        assert!(matches!(err, GeocachingError::RateLimit));
        assert_eq!(transport.request_count(), 12);
    }

    #[test]
    fn api_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Ok(text_response(500, "boom")),
            Ok(json_response(200, json!({}))),
        ]);
        let mut client = client_with(transport.clone());
        let err = client
            .execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default())
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn rate_limit_then_success() {
        let transport = ScriptedTransport::new(vec![
            Ok(text_response(429, "")),
            Ok(text_response(429, "")),
            Ok(json_response(200, json!([]))),
        ]);
        let mut client = client_with(transport.clone());
        let body = client
            .execute(HttpMethod::Get, "/v1/trackables", &RequestOptions::default())
            .unwrap();
        assert_eq!(body, Some(ResponseBody::Json(json!([]))));
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn token_refresh_runs_before_every_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Connect("reset".into())),
            Ok(json_response(200, json!({}))),
        ]);
        let mut client = GeocachingClient::builder()
            .token_refresh(move || -> Result<String> {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("token-{n}"))
            })
            .transport(transport.clone())
            .connection_retry(BackoffPolicy::immediate(3))
            .build()
            .unwrap();
        client.execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let sent = transport.requests();
        assert_eq!(sent[0].header("Authorization"), Some("Bearer token-1"));
        assert_eq!(sent[1].header("Authorization"), Some("Bearer token-2"));
    }

    #[test]
    fn failing_token_refresh_is_terminal() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, json!({})))]);
        let mut client = GeocachingClient::builder()
            .token_refresh(|| -> Result<String> {
                Err(GeocachingError::Connection("idp down".into()))
            })
            .transport(transport.clone())
            .connection_retry(BackoffPolicy::immediate(3))
            .build()
            .unwrap();
        let err = client
            .execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default())
            .unwrap_err();
        assert!(matches!(err, GeocachingError::TokenRefresh(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn timeout_is_passed_to_transport() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(200, json!({})))]);
        let mut client = GeocachingClient::builder()
            .token("t")
            .request_timeout(Duration::from_secs(3))
            .transport(transport.clone())
            .build()
            .unwrap();
        client.execute(HttpMethod::Get, "/v1/users/me", &RequestOptions::default()).unwrap();
        assert_eq!(transport.timeouts(), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn close_never_releases_external_transport() {
        let transport = ScriptedTransport::new(vec![]);
        let mut client = client_with(transport.clone());
        assert_eq!(Arc::strong_count(&transport), 2);
        client.close();
        client.close();
        assert!(client.is_open());
        assert_eq!(Arc::strong_count(&transport), 2);
        drop(client);
        assert_eq!(Arc::strong_count(&transport), 1);
    }

    #[test]
    fn owned_transport_is_created_lazily() {
        let mut client = GeocachingClient::builder().token("t").build().unwrap();
        assert!(!client.is_open());
        client.close();
        assert!(!client.is_open());
    }
}
