//! Blocking client for the Geocaching API.
//!
//! # Overview
//! Authenticates with a bearer token, reads the account profile and a set of
//! tracked trackables, and keeps the results in a `Status` that is merged
//! in place on every refresh.
//!
//! # Design
//! - `GeocachingClient::build_request` and `client::classify_response` are
//!   pure; only a `Transport` does I/O, so the request lifecycle is testable
//!   without a network.
//! - Transport failures and 429 responses are retried with exponential
//!   backoff, each class with its own attempt budget. Every other error is
//!   returned immediately.
//! - Payloads are merged field by field (`extract`): a missing key or a
//!   `null` never erases a known value.
//! - One client runs one refresh at a time; `update` takes `&mut self`.

pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod extract;
pub mod http;
pub mod retry;
pub mod settings;
pub mod types;
pub mod update;

#[cfg(test)]
mod testing;

pub use client::{GeocachingClient, RequestOptions, ResponseBody};
pub use config::{ClientBuilder, TokenRefresh, DEFAULT_REQUEST_TIMEOUT};
pub use environment::{Environment, EnvironmentSettings};
pub use error::{GeocachingError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError, UreqTransport};
pub use retry::BackoffPolicy;
pub use settings::Settings;
pub use types::{
    Coordinate, MembershipLevel, Status, Trackable, TrackableJourney, TrackableLog, User,
};
