use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;

use crate::error::AppError;
use crate::models::{BookingRecord, NewBooking};
use crate::validation::ValidationError;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$",
    )
    .expect("valid email regex")
});

/// Resolves whether a booking's event exists at write time.
pub trait EventLookup {
    fn event_exists(&self, event_id: i64) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Trims and lowercases `value`, then checks it against the address grammar.
pub fn validate_email(value: &str) -> Result<String, ValidationError> {
    let email = value.trim().to_lowercase();
    if EMAIL.is_match(&email) {
        Ok(email)
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

/// Checks the referenced event exists and the email is present and well
/// formed. Uniqueness of (event, email) is left to the store.
pub async fn validate_for_write<L: EventLookup>(
    booking: &NewBooking,
    lookup: &L,
) -> Result<BookingRecord, AppError> {
    if !lookup.event_exists(booking.event_id).await? {
        return Err(ValidationError::EventNotFound.into());
    }
    if booking.email.trim().is_empty() {
        return Err(ValidationError::EmptyEmail.into());
    }
    let email = validate_email(&booking.email)?;

    Ok(BookingRecord {
        event_id: booking.event_id,
        email,
    })
}
