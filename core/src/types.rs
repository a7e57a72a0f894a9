//! Domain model for a Geocaching account.
//!
//! # Design
//! Records are merged from API payloads rather than deserialized wholesale,
//! because every endpoint is called with a field projection: a key missing
//! from a payload means "not requested", and `null` means "no change". Both
//! preserve the stored value (see `extract`). Journeys, coordinates and logs
//! are snapshots and are rebuilt from scratch on each refresh.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::extract::{as_datetime, as_f64, extract, extract_with};

/// Membership tier, decoded from `membershipLevelId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MembershipLevel {
    Unknown,
    Basic,
    Charter,
    Premium,
}

impl MembershipLevel {
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => MembershipLevel::Basic,
            2 => MembershipLevel::Charter,
            3 => MembershipLevel::Premium,
            _ => MembershipLevel::Unknown,
        }
    }
}

/// A Geocaching user: the account owner, a trackable holder or a log author.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct User {
    pub reference_code: Option<String>,
    pub username: Option<String>,
    pub find_count: Option<u32>,
    pub hide_count: Option<u32>,
    pub favorite_points: Option<u32>,
    pub souvenir_count: Option<u32>,
    pub awarded_favorite_points: Option<u32>,
    pub membership_level_id: Option<u8>,
}

impl User {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let mut user = User::default();
        user.merge_from(payload);
        user
    }

    /// Copy every present, non-null field of `payload` onto `self`.
    pub fn merge_from(&mut self, payload: &Map<String, Value>) {
        self.reference_code = extract(payload, "referenceCode", self.reference_code.take());
        self.username = extract(payload, "username", self.username.take());
        self.find_count = extract(payload, "findCount", self.find_count);
        self.hide_count = extract(payload, "hideCount", self.hide_count);
        self.favorite_points = extract(payload, "favoritePoints", self.favorite_points);
        self.souvenir_count = extract(payload, "souvenirCount", self.souvenir_count);
        self.awarded_favorite_points =
            extract(payload, "awardedFavoritePoints", self.awarded_favorite_points);
        self.membership_level_id = extract(payload, "membershipLevelId", self.membership_level_id);
    }

    pub fn membership_level(&self) -> Option<MembershipLevel> {
        self.membership_level_id.map(MembershipLevel::from_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Coordinate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Coordinate {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            latitude: extract_with(payload, "latitude", None, as_f64),
            longitude: extract_with(payload, "longitude", None, as_f64),
        }
    }
}

/// One logged movement of a trackable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackableJourney {
    pub coordinates: Option<Coordinate>,
    pub logged_date: Option<DateTime<Utc>>,
}

impl TrackableJourney {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            coordinates: payload
                .get("coordinates")
                .and_then(Value::as_object)
                .map(Coordinate::from_payload),
            logged_date: extract_with(payload, "loggedDate", None, as_datetime),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackableLog {
    pub reference_code: Option<String>,
    pub owner: Option<User>,
    pub text: Option<String>,
    pub log_type: Option<String>,
    pub logged_date: Option<DateTime<Utc>>,
}

impl TrackableLog {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let log_type = payload
            .get("trackableLogType")
            .and_then(Value::as_object)
            .and_then(|log_type| extract(log_type, "name", None));
        Self {
            reference_code: extract(payload, "referenceCode", None),
            owner: payload
                .get("owner")
                .and_then(Value::as_object)
                .map(User::from_payload),
            text: extract(payload, "text", None),
            log_type,
            logged_date: extract_with(payload, "loggedDate", None, as_datetime),
        }
    }
}

/// A physical item moving between geocaches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trackable {
    pub reference_code: String,
    pub name: Option<String>,
    pub holder: Option<User>,
    pub tracking_number: Option<String>,
    pub kilometers_traveled: Option<f64>,
    pub miles_traveled: Option<f64>,
    pub current_geocache_code: Option<String>,
    pub current_geocache_name: Option<String>,
    pub latest_journey: Option<TrackableJourney>,
    pub is_missing: bool,
    pub trackable_type: Option<String>,
    pub latest_log: Option<TrackableLog>,
}

impl Trackable {
    pub fn new(reference_code: &str) -> Self {
        Self {
            reference_code: reference_code.to_string(),
            ..Self::default()
        }
    }

    /// Merge a `/trackables` record into `self`.
    ///
    /// The reference code is the map key and is never rewritten. A holder
    /// with a different reference code than the stored one replaces it
    /// instead of being merged into it.
    pub fn merge_from(&mut self, payload: &Map<String, Value>) {
        self.name = extract(payload, "name", self.name.take());

        if let Some(incoming) = payload.get("holder").and_then(Value::as_object) {
            let incoming_code = incoming.get("referenceCode").and_then(Value::as_str);
            let same_holder = match (&self.holder, incoming_code) {
                (Some(current), Some(code)) => current.reference_code.as_deref() == Some(code),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !same_holder {
                self.holder = Some(User::default());
            }
            if let Some(holder) = self.holder.as_mut() {
                holder.merge_from(incoming);
            }
        }

        self.tracking_number = extract(payload, "trackingNumber", self.tracking_number.take());
        self.kilometers_traveled =
            extract_with(payload, "kilometersTraveled", self.kilometers_traveled, as_f64);
        self.miles_traveled = extract_with(payload, "milesTraveled", self.miles_traveled, as_f64);
        self.current_geocache_code =
            extract(payload, "currentGeocacheCode", self.current_geocache_code.take());
        self.current_geocache_name =
            extract(payload, "currentGeocacheName", self.current_geocache_name.take());
        self.is_missing = extract(payload, "isMissing", Some(self.is_missing)).unwrap_or_default();
        self.trackable_type = extract(payload, "type", self.trackable_type.take());

        if let Some(latest) = payload
            .get("trackableLogs")
            .and_then(Value::as_array)
            .and_then(|logs| logs.first())
            .and_then(Value::as_object)
        {
            self.latest_log = Some(TrackableLog::from_payload(latest));
        }
    }
}

/// Everything known about the account, refreshed in place by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Status {
    pub user: User,
    /// Keyed by `Trackable::reference_code`. Entries are never removed.
    pub trackables: BTreeMap<String, Trackable>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_user(&mut self, payload: &Map<String, Value>) {
        self.user.merge_from(payload);
    }

    /// Merge every record of a `/trackables` response, inserting unseen codes.
    ///
    /// Records without a reference code cannot be keyed and are skipped.
    pub fn update_trackables(&mut self, records: &[Value]) {
        for record in records {
            let Some(payload) = record.as_object() else {
                tracing::warn!("skipping trackable record that is not an object");
                continue;
            };
            let Some(code) = payload.get("referenceCode").and_then(Value::as_str) else {
                tracing::warn!("skipping trackable record without a reference code");
                continue;
            };
            self.trackables
                .entry(code.to_string())
                .or_insert_with(|| Trackable::new(code))
                .merge_from(payload);
        }
    }
}
