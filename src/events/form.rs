//! Event form parsing and validation.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use url::{Host, Url};
use uuid::Uuid;

use super::EventError;
use crate::models::{
    LinkPlatform, EVENT_LINK_URL_BYTES_MAX, EVENT_LOCATION_BYTES_MAX, EVENT_TITLE_BYTES_MAX,
    TAG_NAME_BYTES_MAX,
};

/// Shortest title accepted when editing
pub const EDIT_TITLE_CHARS_MIN: usize = 5;

/// Shortest location accepted when editing
pub const EDIT_LOCATION_CHARS_MIN: usize = 3;

/// Most tags accepted when editing
pub const EDIT_TAGS_COUNT_MAX: usize = 10;

/// Add and edit forms share fields but not every rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

/// Event form as submitted. Field names follow the add form, the edit
/// form's names are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventForm {
    #[serde(rename = "event_title")]
    pub title: String,
    #[serde(rename = "office", alias = "department")]
    pub department: String,
    #[serde(rename = "event_date")]
    pub date: String,
    #[serde(rename = "event_time")]
    pub time: String,
    pub location: String,
    pub description: String,
    #[serde(rename = "tags_input", alias = "tags")]
    pub tags: String,
    #[serde(rename = "facebook_link", alias = "facebook")]
    pub facebook: String,
    #[serde(rename = "tiktok_link", alias = "tiktok")]
    pub tiktok: String,
    #[serde(rename = "youtube_link", alias = "youtube")]
    pub youtube: String,
    #[serde(rename = "website_link", alias = "website")]
    pub website: String,
}

impl EventForm {
    fn link(&self, platform: LinkPlatform) -> &str {
        match platform {
            LinkPlatform::Facebook => &self.facebook,
            LinkPlatform::TikTok => &self.tiktok,
            LinkPlatform::YouTube => &self.youtube,
            LinkPlatform::Website => &self.website,
        }
    }
}

/// A form that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEvent {
    pub title: String,
    pub department_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
    pub description: String,
    pub tags: Vec<String>,
    pub links: Vec<(LinkPlatform, String)>,
}

/// Split `"SDG, Workshop #Seminar"` into unique tags, `#` stripped, first
/// spelling kept.
#[must_use]
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in raw.replace(',', " ").split_whitespace() {
        let tag = token.trim_start_matches('#').trim();
        if tag.is_empty() {
            continue;
        }
        if !out.iter().any(|t| t.to_lowercase() == tag.to_lowercase()) {
            out.push(tag.to_string());
        }
    }
    out
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// http(s) URL with a real host.
fn is_valid_url(raw: &str) -> bool {
    if raw.len() > EVENT_LINK_URL_BYTES_MAX {
        return false;
    }
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(Host::Domain(domain)) => {
            domain == "localhost"
                || domain
                    .rsplit_once('.')
                    .is_some_and(|(name, tld)| {
                        !name.is_empty()
                            && tld.len() >= 2
                            && tld.chars().all(|c| c.is_ascii_alphabetic())
                    })
        }
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => true,
        None => false,
    }
}

/// Check every rule in order and return the first failure.
pub fn validate_event_form(form: &EventForm, mode: FormMode) -> Result<ValidEvent, EventError> {
    let title = form.title.trim();
    let department = form.department.trim();
    let date = form.date.trim();
    let time = form.time.trim();
    let location = form.location.trim();
    let description = form.description.trim();

    for (field, label, value) in [
        ("event_title", "Event Title", title),
        ("department", "Office/Department", department),
        ("event_date", "Event Date", date),
        ("event_time", "Event Time", time),
        ("location", "Location", location),
        ("description", "Description", description),
    ] {
        if value.is_empty() {
            return Err(EventError::invalid(field, format!("{label} is required.")));
        }
    }

    let date = parse_date(date)
        .ok_or_else(|| EventError::invalid("event_date", "Invalid date format. Use YYYY-MM-DD."))?;
    let time = parse_time(time)
        .ok_or_else(|| EventError::invalid("event_time", "Invalid time format. Use 24-hr HH:MM."))?;

    let mut links = Vec::new();
    for platform in LinkPlatform::all() {
        let url = form.link(*platform).trim();
        if url.is_empty() {
            continue;
        }
        if !is_valid_url(url) {
            return Err(EventError::invalid(
                &platform.as_str().to_lowercase(),
                format!("{} is not a valid URL.", platform.label()),
            ));
        }
        links.push((*platform, url.to_string()));
    }

    if title.len() > EVENT_TITLE_BYTES_MAX {
        return Err(EventError::invalid(
            "event_title",
            format!("Event Title must be at most {EVENT_TITLE_BYTES_MAX} characters."),
        ));
    }
    if location.len() > EVENT_LOCATION_BYTES_MAX {
        return Err(EventError::invalid(
            "location",
            format!("Location must be at most {EVENT_LOCATION_BYTES_MAX} characters."),
        ));
    }

    let tags = parse_tags(&form.tags);
    if let Some(long) = tags.iter().find(|t| t.len() > TAG_NAME_BYTES_MAX) {
        return Err(EventError::invalid(
            "tags",
            format!("Tag '{long}' must be at most {TAG_NAME_BYTES_MAX} characters."),
        ));
    }

    if mode == FormMode::Edit {
        if title.chars().count() < EDIT_TITLE_CHARS_MIN {
            return Err(EventError::invalid(
                "event_title",
                "Title must be at least 5 characters.",
            ));
        }
        if location.chars().count() < EDIT_LOCATION_CHARS_MIN {
            return Err(EventError::invalid("location", "Location is too short."));
        }
        if tags.len() > EDIT_TAGS_COUNT_MAX {
            return Err(EventError::invalid("tags", "Please limit to at most 10 tags."));
        }
    }

    let department_id = Uuid::parse_str(department).map_err(|_| {
        EventError::invalid("department", "Selected office/department does not exist.")
    })?;

    Ok(ValidEvent {
        title: title.to_string(),
        department_id,
        date,
        time,
        location: location.to_string(),
        description: description.to_string(),
        tags,
        links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> EventForm {
        EventForm {
            title: "Career Fair".to_string(),
            department: Uuid::new_v4().to_string(),
            date: "2025-03-07".to_string(),
            time: "09:00".to_string(),
            location: "PE".to_string(),
            description: "Annual".to_string(),
            ..EventForm::default()
        }
    }

    fn message(form: &EventForm) -> String {
        validate_event_form(form, FormMode::Create)
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            parse_tags("SDG, Workshop #Seminar"),
            vec!["SDG", "Workshop", "Seminar"]
        );
        assert_eq!(parse_tags("a A #a ,, ##b"), vec!["a", "b"]);
        assert!(parse_tags("  , # ").is_empty());
    }

    #[test]
    fn test_required_in_order() {
        let mut form = EventForm::default();
        assert_eq!(message(&form), "Event Title is required.");
        form.title = "T".to_string();
        assert_eq!(message(&form), "Office/Department is required.");
        form.department = "x".to_string();
        form.date = "x".to_string();
        form.time = "x".to_string();
        form.location = "x".to_string();
        assert_eq!(message(&form), "Description is required.");
    }

    #[test]
    fn test_date_time_formats() {
        let mut form = valid_form();
        form.date = "03/07/2025".to_string();
        assert_eq!(message(&form), "Invalid date format. Use YYYY-MM-DD.");

        let mut form = valid_form();
        form.time = "9am".to_string();
        assert_eq!(message(&form), "Invalid time format. Use 24-hr HH:MM.");

        let mut form = valid_form();
        form.time = "25:00".to_string();
        assert_eq!(message(&form), "Invalid time format. Use 24-hr HH:MM.");
    }

    #[test]
    fn test_link_validation() {
        let mut form = valid_form();
        form.tiktok = "tiktok.com/@arcasys".to_string();
        assert_eq!(message(&form), "TikTok Link is not a valid URL.");

        let mut form = valid_form();
        form.website = "ftp://files.cit.edu/agenda.pdf".to_string();
        assert_eq!(message(&form), "Website Link is not a valid URL.");

        let mut form = valid_form();
        form.website = "https://cit.edu/events".to_string();
        form.youtube = "http://localhost:8000/v".to_string();
        let valid = validate_event_form(&form, FormMode::Create).unwrap();
        assert_eq!(valid.links.len(), 2);
        assert_eq!(valid.links[0].0, LinkPlatform::YouTube);
    }

    #[test]
    fn test_edit_only_rules() {
        let form = valid_form();
        assert!(validate_event_form(&form, FormMode::Create).is_ok());
        let err = validate_event_form(&form, FormMode::Edit).unwrap_err();
        assert_eq!(err.to_string(), "Location is too short.");

        let mut form = valid_form();
        form.location = "Main Gym".to_string();
        form.tags = (0..11).map(|i| format!("t{i}")).collect::<Vec<_>>().join(",");
        let err = validate_event_form(&form, FormMode::Edit).unwrap_err();
        assert_eq!(err.to_string(), "Please limit to at most 10 tags.");
    }

    #[test]
    fn test_deserialize_accepts_edit_names() {
        let form: EventForm = serde_json::from_value(serde_json::json!({
            "event_title": "Career Fair",
            "department": "abc",
            "tags": "x",
            "facebook": "https://facebook.com/x"
        }))
        .unwrap();
        assert_eq!(form.department, "abc");
        assert_eq!(form.tags, "x");
        assert_eq!(form.facebook, "https://facebook.com/x");
    }
}
