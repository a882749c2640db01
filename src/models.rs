use std::fmt;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EventError, SyncError};

pub const DEFAULT_TTL_SECS: u64 = 3600;

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_enabled() -> bool {
    true
}

/// One configured external feed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventSourceConfig {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub uri: String,
    /// Minimum number of seconds between fetches.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Hours added to every feed timestamp to correct a misreported timezone.
    #[serde(default)]
    pub time_shift: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// IANA zone for feed timestamps that carry no offset. UTC when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub fields: CustomFieldMap,
}

impl EventSourceConfig {
    pub fn new(id: &str, label: &str, source_type: &str, uri: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            source_type: source_type.to_string(),
            uri: uri.to_string(),
            ttl: DEFAULT_TTL_SECS,
            time_shift: 0,
            enabled: true,
            credentials: None,
            timezone: None,
            fields: CustomFieldMap::default(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.id.trim().is_empty() {
            return Err(SyncError::config("source id cannot be empty"));
        }
        reqwest::Url::parse(&self.uri)
            .map_err(|err| SyncError::config(format!("invalid uri {:?}: {err}", self.uri)))?;
        self.zone()?;
        Ok(())
    }

    pub fn zone(&self) -> Result<Tz, SyncError> {
        match self.timezone.as_deref() {
            None => Ok(Tz::UTC),
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| SyncError::config(format!("unknown timezone {name:?}"))),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Custom-field ids used by one calendar installation.
///
/// Each list is processed in order and every value of every id is applied,
/// so a later id overwrites what an earlier one set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct CustomFieldMap {
    pub open_to_public: Vec<String>,
    pub admission_price: Vec<String>,
    pub organizer_name: Vec<String>,
    pub organizer_telephone: Vec<String>,
    pub organizer_email: Vec<String>,
    pub event_types: Vec<String>,
}

impl Default for CustomFieldMap {
    fn default() -> Self {
        let ids = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        Self {
            open_to_public: ids(&["623"]),
            admission_price: ids(&["625"]),
            // Contact (MIIS) first, then Submitter Name (Midd).
            organizer_name: ids(&["4407", "884"]),
            organizer_telephone: ids(&["885"]),
            organizer_email: ids(&["886"]),
            event_types: ids(&["12"]),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocationReference {
    pub id: LocationId,
    pub name: String,
}

/// Canonical event produced by a source.
///
/// Optional fields distinguish "not asserted by the feed" from an empty
/// value: read them through the `has_*` checks or handle the `Err` from the
/// getter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    id: String,
    source_id: String,
    title: String,
    start: DateTime<FixedOffset>,
    end: Option<DateTime<FixedOffset>>,
    blurb: Option<String>,
    body: Option<String>,
    open_to_public: Option<bool>,
    location_id: Option<LocationId>,
    location_label: Option<String>,
    admission_price: Option<String>,
    organizer_name: Option<String>,
    organizer_email: Option<String>,
    organizer_telephone: Option<String>,
    featured_photo_url: Option<String>,
    event_types: Option<Vec<String>>,
}

macro_rules! optional_text {
    ($field:ident, $has:ident, $set:ident) => {
        pub fn $has(&self) -> bool {
            self.$field.is_some()
        }

        pub fn $field(&self) -> Result<&str, EventError> {
            self.$field
                .as_deref()
                .ok_or(EventError::Unset(stringify!($field)))
        }

        pub fn $set(&mut self, value: impl Into<String>) {
            self.$field = Some(value.into());
        }
    };
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            title: title.into(),
            start,
            end: None,
            blurb: None,
            body: None,
            open_to_public: None,
            location_id: None,
            location_label: None,
            admission_price: None,
            organizer_name: None,
            organizer_email: None,
            organizer_telephone: None,
            featured_photo_url: None,
            event_types: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn has_end(&self) -> bool {
        self.end.is_some()
    }

    pub fn end(&self) -> Result<DateTime<FixedOffset>, EventError> {
        self.end.ok_or(EventError::Unset("end"))
    }

    pub fn set_end(&mut self, end: DateTime<FixedOffset>) {
        self.end = Some(end);
    }

    pub fn has_open_to_public(&self) -> bool {
        self.open_to_public.is_some()
    }

    pub fn is_open_to_public(&self) -> Result<bool, EventError> {
        self.open_to_public.ok_or(EventError::Unset("open_to_public"))
    }

    pub fn set_open_to_public(&mut self, open: bool) {
        self.open_to_public = Some(open);
    }

    pub fn has_location_id(&self) -> bool {
        self.location_id.is_some()
    }

    pub fn location_id(&self) -> Result<LocationId, EventError> {
        self.location_id.ok_or(EventError::Unset("location_id"))
    }

    pub fn set_location_id(&mut self, id: LocationId) {
        self.location_id = Some(id);
    }

    pub fn has_event_types(&self) -> bool {
        self.event_types.is_some()
    }

    pub fn event_types(&self) -> Result<&[String], EventError> {
        self.event_types
            .as_deref()
            .ok_or(EventError::Unset("event_types"))
    }

    pub fn set_event_types(&mut self, types: Vec<String>) {
        self.event_types = Some(types);
    }

    optional_text!(blurb, has_blurb, set_blurb);
    optional_text!(body, has_body, set_body);
    optional_text!(location_label, has_location_label, set_location_label);
    optional_text!(admission_price, has_admission_price, set_admission_price);
    optional_text!(organizer_name, has_organizer_name, set_organizer_name);
    optional_text!(organizer_email, has_organizer_email, set_organizer_email);
    optional_text!(
        organizer_telephone,
        has_organizer_telephone,
        set_organizer_telephone
    );
    optional_text!(
        featured_photo_url,
        has_featured_photo_url,
        set_featured_photo_url
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-01T19:00:00-05:00").unwrap()
    }

    #[test]
    fn unset_optional_fields_are_errors() {
        let event = Event::new("guid-1", "campus", "Concert", start());
        assert!(!event.has_end());
        assert_eq!(event.end(), Err(EventError::Unset("end")));
        assert_eq!(event.body(), Err(EventError::Unset("body")));
        assert_eq!(
            event.is_open_to_public(),
            Err(EventError::Unset("open_to_public"))
        );
        assert!(event.event_types().is_err());
    }

    #[test]
    fn empty_string_is_a_set_value() {
        let mut event = Event::new("guid-1", "campus", "Concert", start());
        event.set_admission_price("");
        assert!(event.has_admission_price());
        assert_eq!(event.admission_price(), Ok(""));
    }

    #[test]
    fn source_config_defaults_from_json() {
        let config: EventSourceConfig = serde_json::from_str(
            r#"{"id":"midd","label":"Middlebury","type":"r25rss","uri":"https://example.edu/rss"}"#,
        )
        .unwrap();
        assert_eq!(config.ttl, 3600);
        assert_eq!(config.time_shift, 0);
        assert!(config.enabled);
        assert_eq!(config.fields, CustomFieldMap::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_uri_and_zone() {
        let mut config = EventSourceConfig::new("midd", "Midd", "r25rss", "not a uri");
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        config.uri = "https://example.edu/rss".into();
        config.timezone = Some("Mars/Olympus".into());
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            username: "svc".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{creds:?}");
        assert!(printed.contains("svc"));
        assert!(!printed.contains("hunter2"));
    }
}
