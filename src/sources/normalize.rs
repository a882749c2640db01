//! Raw feed item -> canonical [`Event`].
//!
//! The rules run in a fixed order and later rules overwrite what earlier
//! ones set for the same field. That ordering is part of the contract:
//! installations disagree on which custom field carries the organizer, and
//! the last matching field wins.

use crate::error::NormalizeError;
use crate::models::{CustomFieldMap, Event, EventSourceConfig};
use crate::sources::base;

/// One feed item as extracted from the wire format, before any
/// interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    /// `(field id, value)` in document order.
    pub custom_fields: Vec<(String, String)>,
}

impl RawItem {
    fn values_for<'a>(&'a self, ids: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        ids.iter().flat_map(move |id| {
            self.custom_fields
                .iter()
                .filter(move |(field_id, _)| field_id == id)
                .map(|(_, value)| value.as_str())
        })
    }
}

/// Build the event for `item`. Pure: the location label is set here, the
/// location id is resolved by the caller.
pub fn normalize(item: &RawItem, source: &EventSourceConfig) -> Result<Event, NormalizeError> {
    let zone = source.zone().unwrap_or(chrono_tz::Tz::UTC);
    let fields: &CustomFieldMap = &source.fields;

    let id = item
        .guid
        .as_deref()
        .map(str::trim)
        .filter(|guid| !guid.is_empty())
        .ok_or(NormalizeError::MissingField("guid"))?;

    let title = item
        .title
        .as_deref()
        .filter(|title| !title.trim().is_empty())
        .ok_or(NormalizeError::MissingField("title"))?;

    let start_text = item
        .start
        .as_deref()
        .filter(|text| !text.trim().is_empty())
        .ok_or(NormalizeError::MissingField("dtstart"))?;
    let start = base::parse_feed_datetime(start_text, zone).ok_or_else(|| {
        NormalizeError::InvalidTimestamp {
            field: "dtstart",
            value: start_text.to_string(),
        }
    })?;

    let mut event = Event::new(
        id,
        source.id.as_str(),
        title,
        base::shift_hours(start, source.time_shift),
    );

    if let Some(end_text) = item.end.as_deref().filter(|text| !text.trim().is_empty()) {
        let end = base::parse_feed_datetime(end_text, zone).ok_or_else(|| {
            NormalizeError::InvalidTimestamp {
                field: "dtend",
                value: end_text.to_string(),
            }
        })?;
        event.set_end(base::shift_hours(end, source.time_shift));
    }

    // The feed has no separate blurb.
    if let Some(body) = item.description.as_deref().and_then(base::paragraphs) {
        event.set_body(body);
    }

    for value in item.values_for(&fields.open_to_public) {
        if let Some(open) = base::parse_public_flag(value) {
            event.set_open_to_public(open);
        }
    }

    if let Some(label) = item
        .location
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
    {
        event.set_location_label(label);
    }

    for value in item.values_for(&fields.admission_price) {
        event.set_admission_price(value);
    }
    for value in item.values_for(&fields.organizer_name) {
        event.set_organizer_name(value);
    }
    for value in item.values_for(&fields.organizer_telephone) {
        event.set_organizer_telephone(value);
    }
    for value in item.values_for(&fields.organizer_email) {
        event.set_organizer_email(value);
    }

    let event_types = item
        .values_for(&fields.event_types)
        .map(base::clean_event_type)
        .collect();
    event.set_event_types(event_types);

    Ok(event)
}
