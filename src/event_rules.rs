//! Write-time rules for events: slug derivation, date/time normalization
//! and field validation. Everything here is pure; the repository layer runs
//! [`validate_for_write`] before every insert or update.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Event, EventDraft, EventRecord, Mode};
use crate::validation::ValidationError;

const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 1000;
const OVERVIEW_MAX: usize = 500;

static TIME_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").expect("valid time regex"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Lowercases `title` and keeps only ASCII letters and digits, turning each
/// run of whitespace or hyphens into a single `-`. Never starts or ends
/// with a hyphen.
pub fn derive_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            pending_dash = true;
        }
    }

    slug
}

/// Parses a calendar date in any of the accepted representations and
/// returns it as `YYYY-MM-DD` (UTC calendar day for zoned timestamps).
pub fn normalize_date(input: &str) -> Result<String, ValidationError> {
    let input = input.trim();

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(input)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).date_naive())
        })
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
                .map(|dt| dt.date())
        })
        .ok_or(ValidationError::InvalidDate)?;

    Ok(date.format("%Y-%m-%d").to_string())
}

/// Accepts 24-hour `H:MM` or `HH:MM` and returns it unchanged.
pub fn normalize_time(input: &str) -> Result<String, ValidationError> {
    if TIME_24H.is_match(input) {
        Ok(input.to_string())
    } else {
        Err(ValidationError::InvalidTime)
    }
}

fn required(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(value.to_string())
}

fn bounded(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn trimmed_items(items: &[String]) -> Vec<String> {
    items.iter().map(|item| item.trim().to_string()).collect()
}

/// Runs every event rule against `draft` and returns the record to persist.
///
/// `previous` is the stored event when this is an update. Slug, date and
/// time are only recomputed when the corresponding input differs from it;
/// on insert they are always computed.
///
/// Order: slug, date, time, agenda/tags non-empty, required strings,
/// lengths, mode. The first failing rule is returned.
pub fn validate_for_write(
    draft: &EventDraft,
    previous: Option<&Event>,
) -> Result<EventRecord, ValidationError> {
    let title = draft.title.trim();

    let slug = match previous {
        Some(prev) if prev.title == title => prev.slug.clone(),
        _ => {
            let slug = derive_slug(title);
            if slug.is_empty() && !title.is_empty() {
                return Err(ValidationError::UnsluggableTitle);
            }
            slug
        }
    };

    let date = match previous {
        Some(prev) if prev.date == draft.date => prev.date.clone(),
        _ => normalize_date(&draft.date)?,
    };

    let time = match previous {
        Some(prev) if prev.time == draft.time => prev.time.clone(),
        _ => normalize_time(&draft.time)?,
    };

    if draft.agenda.is_empty() {
        return Err(ValidationError::Empty { field: "agenda" });
    }
    if draft.tags.is_empty() {
        return Err(ValidationError::Empty { field: "tags" });
    }

    let title = required("title", &draft.title)?;
    let description = required("description", &draft.description)?;
    let overview = required("overview", &draft.overview)?;
    let image = required("image", &draft.image)?;
    let venue = required("venue", &draft.venue)?;
    let location = required("location", &draft.location)?;
    let organizer = required("organizer", &draft.organizer)?;
    let audience = required("audience", &draft.audience)?;

    bounded("title", &title, TITLE_MAX)?;
    bounded("description", &description, DESCRIPTION_MAX)?;
    bounded("overview", &overview, OVERVIEW_MAX)?;

    let mode: Mode = draft.mode.parse()?;

    Ok(EventRecord {
        title,
        slug,
        description,
        overview,
        image,
        venue,
        location,
        date,
        time,
        mode,
        audience,
        agenda: trimmed_items(&draft.agenda),
        organizer,
        tags: trimmed_items(&draft.tags),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn summer_camp() -> EventDraft {
        EventDraft {
            title: "Summer Camp".into(),
            description: "A week of grappling".into(),
            overview: "Camp".into(),
            image: "http://localhost:3000/uploads/camp.png".into(),
            venue: "Main Gym".into(),
            location: "Lisbon".into(),
            date: "2025-7-4".into(),
            time: "9:30".into(),
            mode: "ONLINE".into(),
            audience: "Everyone".into(),
            agenda: vec!["intro".into()],
            organizer: "GrappleGo".into(),
            tags: vec!["bjj".into()],
        }
    }

    fn stored(record: EventRecord) -> Event {
        let now = Utc::now();
        Event {
            id: 1,
            title: record.title,
            slug: record.slug,
            description: record.description,
            overview: record.overview,
            image: record.image,
            venue: record.venue,
            location: record.location,
            date: record.date,
            time: record.time,
            mode: record.mode,
            audience: record.audience,
            agenda: record.agenda,
            organizer: record.organizer,
            tags: record.tags,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn slug_from_title() {
        assert_eq!(derive_slug("BJJ Open Mat"), "bjj-open-mat");
        assert_eq!(derive_slug("  No-Gi   Night!! "), "no-gi-night");
        assert_eq!(derive_slug("C'est la vie: 2025"), "cest-la-vie-2025");
        assert_eq!(derive_slug("café crème"), "caf-crme");
        assert_eq!(derive_slug("!!!"), "");
    }

    #[test]
    fn slug_is_idempotent_and_clean() {
        for title in ["BJJ Open Mat", " --Leg  Locks-- ", "Tab\tand\nnewline", "ÄÖÜ 42 ", "a - b"] {
            let slug = derive_slug(title);
            assert_eq!(derive_slug(&slug), slug, "not idempotent for {title:?}");
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            assert!(
                slug.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            );
        }
    }

    #[test]
    fn dates_normalize_to_calendar_day() {
        assert_eq!(normalize_date("2025-07-04").unwrap(), "2025-07-04");
        assert_eq!(normalize_date("2025-7-4").unwrap(), "2025-07-04");
        assert_eq!(normalize_date("2025/07/04").unwrap(), "2025-07-04");
        assert_eq!(normalize_date("July 4, 2025").unwrap(), "2025-07-04");
        assert_eq!(normalize_date("2025-07-04T10:00:00Z").unwrap(), "2025-07-04");
        assert_eq!(
            normalize_date("2025-07-04T23:30:00-02:00").unwrap(),
            "2025-07-05"
        );
    }

    #[test]
    fn bad_dates_are_rejected() {
        assert_eq!(normalize_date("tomorrow"), Err(ValidationError::InvalidDate));
        assert_eq!(normalize_date("2025-02-30"), Err(ValidationError::InvalidDate));
        assert_eq!(normalize_date(""), Err(ValidationError::InvalidDate));
    }

    #[test]
    fn times_are_24_hour() {
        assert_eq!(normalize_time("09:05").unwrap(), "09:05");
        assert_eq!(normalize_time("23:59").unwrap(), "23:59");
        assert_eq!(normalize_time("00:00").unwrap(), "00:00");
        assert_eq!(normalize_time("9:30").unwrap(), "9:30");
        assert_eq!(normalize_time("9:5"), Err(ValidationError::InvalidTime));
        assert_eq!(normalize_time("123:00"), Err(ValidationError::InvalidTime));
        assert_eq!(normalize_time("24:00"), Err(ValidationError::InvalidTime));
        assert_eq!(normalize_time("12:60"), Err(ValidationError::InvalidTime));
    }

    #[test]
    fn summer_camp_normalizes() {
        let record = validate_for_write(&summer_camp(), None).unwrap();
        assert_eq!(record.slug, "summer-camp");
        assert_eq!(record.date, "2025-07-04");
        assert_eq!(record.time, "9:30");
        assert_eq!(record.mode, Mode::Online);
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let draft = EventDraft {
            time: "24:00".into(),
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::InvalidTime)
        );
    }

    #[test]
    fn first_failure_wins() {
        let draft = EventDraft {
            date: "nope".into(),
            agenda: vec![],
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::InvalidDate)
        );

        let draft = EventDraft {
            agenda: vec![],
            venue: " ".into(),
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::Empty { field: "agenda" })
        );

        let draft = EventDraft {
            tags: vec![],
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::Empty { field: "tags" })
        );
    }

    #[test]
    fn required_strings_and_limits() {
        let draft = EventDraft {
            venue: "   ".into(),
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::Empty { field: "venue" })
        );

        let draft = EventDraft {
            overview: "x".repeat(501),
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::TooLong { field: "overview", max: 500 })
        );

        let draft = EventDraft {
            mode: "in-person".into(),
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::InvalidMode("in-person".into()))
        );

        let draft = EventDraft {
            title: "???".into(),
            ..summer_camp()
        };
        assert_eq!(
            validate_for_write(&draft, None),
            Err(ValidationError::UnsluggableTitle)
        );
    }

    #[test]
    fn update_only_recomputes_changed_fields() {
        let existing = stored(validate_for_write(&summer_camp(), None).unwrap());

        let same = EventDraft::from(&existing);
        let record = validate_for_write(&same, Some(&existing)).unwrap();
        assert_eq!(record.slug, "summer-camp");
        assert_eq!(record.date, "2025-07-04");

        let renamed = EventDraft {
            title: "Winter Camp".into(),
            date: "2025-12-1".into(),
            ..EventDraft::from(&existing)
        };
        let record = validate_for_write(&renamed, Some(&existing)).unwrap();
        assert_eq!(record.slug, "winter-camp");
        assert_eq!(record.date, "2025-12-01");
    }
}
