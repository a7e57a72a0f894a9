//! Refreshing the account `Status`.
//!
//! # Design
//! A refresh runs its calls one after another: the user profile first, then,
//! when trackables are configured, the trackables listing followed by one
//! latest-journey call per known trackable. Each successful call is merged
//! into `Status` immediately, so a failure part-way keeps what was already
//! applied.

use serde_json::Value;
use url::form_urlencoded::byte_serialize;

use crate::client::{GeocachingClient, RequestOptions};
use crate::environment::API_VERSION;
use crate::error::{GeocachingError, Result};
use crate::http::HttpMethod;
use crate::settings::Settings;
use crate::types::{Status, TrackableJourney};

/// Fields requested from `/users/me`.
pub const USER_FIELDS: &[&str] = &[
    "referenceCode",
    "username",
    "findCount",
    "hideCount",
    "favoritePoints",
    "souvenirCount",
    "awardedFavoritePoints",
    "membershipLevelId",
];

/// Fields requested from `/trackables`.
pub const TRACKABLE_FIELDS: &[&str] = &[
    "referenceCode",
    "name",
    "holder",
    "trackingNumber",
    "kilometersTraveled",
    "milesTraveled",
    "currentGeocacheCode",
    "currentGeocacheName",
    "isMissing",
    "type",
];

pub fn user_path() -> String {
    format!("/{API_VERSION}/users/me?fields={}", USER_FIELDS.join(","))
}

/// Listing path for `codes`. Each code is percent-encoded; the commas
/// between them are not.
pub fn trackables_path(codes: &[String]) -> String {
    let codes: Vec<String> = codes.iter().map(|code| encode(code)).collect();
    format!(
        "/{API_VERSION}/trackables?referenceCodes={}&fields={}&expand=trackablelogs:1",
        codes.join(","),
        TRACKABLE_FIELDS.join(",")
    )
}

pub fn journeys_path(reference_code: &str) -> String {
    format!(
        "/{API_VERSION}/trackables/{}/journeys?sort=loggedDate-&take=1",
        encode(reference_code)
    )
}

// `byte_serialize` writes a space as `+` and a literal `+` as `%2B`, so every
// remaining `+` is a space. `%20` is valid in both paths and queries.
fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect::<String>().replace('+', "%20")
}

impl GeocachingClient {
    /// Refresh the user and, if configured, the tracked trackables.
    ///
    /// Returns the same `Status` on every call; it is updated in place.
    pub fn update(&mut self) -> Result<&Status> {
        let settings = self.settings.clone();
        self.update_user()?;
        if settings.tracks_trackables() {
            self.update_trackables(settings.trackable_codes())?;
        }
        Ok(&self.status)
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings. Takes effect on the next `update`.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    fn update_user(&mut self) -> Result<()> {
        match self.get_json(&user_path())? {
            Some(Value::Object(payload)) => self.status.update_user(&payload),
            Some(other) => {
                return Err(GeocachingError::Deserialization(format!(
                    "expected a user object, got {other}"
                )))
            }
            None => tracing::warn!("user profile came back empty; keeping previous values"),
        }
        Ok(())
    }

    fn update_trackables(&mut self, codes: &[String]) -> Result<()> {
        match self.get_json(&trackables_path(codes))? {
            Some(Value::Array(records)) => self.status.update_trackables(&records),
            Some(other) => {
                return Err(GeocachingError::Deserialization(format!(
                    "expected a list of trackables, got {other}"
                )))
            }
            None => tracing::warn!("trackables came back empty; keeping previous values"),
        }

        let known: Vec<String> = self.status.trackables.keys().cloned().collect();
        for code in known {
            self.update_latest_journey(&code)?;
        }
        Ok(())
    }

    fn update_latest_journey(&mut self, reference_code: &str) -> Result<()> {
        let journeys = match self.get_json(&journeys_path(reference_code))? {
            Some(Value::Array(journeys)) => journeys,
            Some(other) => {
                return Err(GeocachingError::Deserialization(format!(
                    "expected a list of journeys, got {other}"
                )))
            }
            None => Vec::new(),
        };

        let latest = match journeys.as_slice() {
            [only] => only.as_object().map(TrackableJourney::from_payload),
            _ => None,
        };
        if let Some(trackable) = self.status.trackables.get_mut(reference_code) {
            trackable.latest_journey = latest;
        }
        Ok(())
    }

    fn get_json(&mut self, relative: &str) -> Result<Option<Value>> {
        self.execute(HttpMethod::Get, relative, &RequestOptions::default())?
            .map(|body| body.into_json())
            .transpose()
    }
}
