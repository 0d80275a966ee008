use crate::{
    booking_rules,
    connection::ConnectionStatus,
    db,
    error::AppError,
    event_rules,
    models::{Booking, Event, EventChanges, EventDraft, NewBooking},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{
        Multipart, Path, State,
        multipart::MultipartRejection,
        rejection::JsonRejection,
    },
    http::StatusCode,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: ConnectionStatus,
}

pub async fn health(State(app_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        database: app_state.db.status(),
    })
}

#[derive(Serialize)]
pub struct EventsResponse {
    message: &'static str,
    events: Vec<Event>,
}

pub async fn get_events(State(app_state): State<AppState>) -> Result<Json<EventsResponse>, AppError> {
    let pool = app_state.db.acquire().await?;
    let events = db::get_all_events(&pool).await?;
    Ok(Json(EventsResponse {
        message: "Event fetched successfully",
        events,
    }))
}

#[derive(Serialize)]
pub struct EventResponse {
    message: &'static str,
    event: Event,
}

pub async fn get_event_details(
    State(app_state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<EventResponse>, AppError> {
    let pool = app_state.db.acquire().await?;
    let event = db::find_event_by_slug(&pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event '{slug}' not found")))?;
    Ok(Json(EventResponse {
        message: "Event fetched successfully",
        event,
    }))
}

#[derive(Serialize)]
pub struct SimilarEventsResponse {
    events: Vec<Event>,
}

pub async fn get_similar_events(
    State(app_state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<SimilarEventsResponse>, AppError> {
    let pool = app_state.db.acquire().await?;
    let events = db::find_similar_events(&pool, &slug, true).await?;
    Ok(Json(SimilarEventsResponse { events }))
}

struct UploadedImage {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Bytes,
}

#[derive(Default)]
struct EventForm {
    fields: HashMap<String, String>,
    image: Option<UploadedImage>,
}

impl EventForm {
    fn take(&mut self, name: &str) -> String {
        self.fields.remove(name).unwrap_or_default()
    }

    fn into_draft(mut self, image_url: String) -> Result<EventDraft, AppError> {
        let agenda = parse_list("agenda", &self.take("agenda"))?;
        let tags = parse_list("tags", &self.take("tags"))?;
        Ok(EventDraft {
            title: self.take("title"),
            description: self.take("description"),
            overview: self.take("overview"),
            image: image_url,
            venue: self.take("venue"),
            location: self.take("location"),
            date: self.take("date"),
            time: self.take("time"),
            mode: self.take("mode"),
            audience: self.take("audience"),
            agenda,
            organizer: self.take("organizer"),
            tags,
        })
    }
}

/// List fields arrive either as a JSON array string or comma separated.
fn parse_list(field: &str, raw: &str) -> Result<Vec<String>, AppError> {
    let raw = raw.trim();
    let items: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("{field} is not a valid list: {e}")))?
    } else {
        raw.split(',').map(str::to_string).collect()
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

async fn read_event_form(mut multipart: Multipart) -> Result<EventForm, AppError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        AppError::BadRequest(format!("Invalid form data: {e}"))
    };

    let mut form = EventForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(invalid)?;
            if !bytes.is_empty() {
                form.image = Some(UploadedImage {
                    file_name,
                    content_type,
                    bytes,
                });
            }
        } else {
            let value = field.text().await.map_err(invalid)?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

/// Stands in for the image URL until the draft has passed validation.
const PENDING_IMAGE: &str = "pending-upload";

pub async fn create_event_handler(
    State(app_state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<EventResponse>), AppError> {
    let multipart = multipart?;
    let pool = app_state.db.acquire().await?;
    let mut form = read_event_form(multipart).await?;

    let image = form
        .image
        .take()
        .ok_or_else(|| AppError::BadRequest("Image file is required".to_string()))?;

    let draft = form.into_draft(PENDING_IMAGE.to_string())?;
    let mut record = event_rules::validate_for_write(&draft, None)?;

    record.image = app_state
        .images
        .upload(
            image.file_name.as_deref(),
            image.content_type.as_deref(),
            image.bytes,
        )
        .await?;

    let event = match db::create_event(&pool, &record).await {
        Ok(event) => event,
        Err(e) => {
            if let Err(cleanup) = app_state.images.remove(&record.image).await {
                tracing::warn!(error = %cleanup, image = %record.image, "orphaned upload");
            }
            return Err(e);
        }
    };

    app_state
        .analytics
        .capture("event-created", json!({ "eventId": event.id, "slug": event.slug }));
    tracing::info!(slug = %event.slug, "event created");

    Ok((
        StatusCode::CREATED,
        Json(EventResponse {
            message: "Event created successfully",
            event,
        }),
    ))
}

pub async fn update_event_handler(
    State(app_state): State<AppState>,
    Path(slug): Path<String>,
    changes: Result<Json<EventChanges>, JsonRejection>,
) -> Result<Json<EventResponse>, AppError> {
    let Json(changes) = changes?;
    let pool = app_state.db.acquire().await?;
    let existing = db::find_event_by_slug(&pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event '{slug}' not found")))?;

    let draft = changes.apply_to(EventDraft::from(&existing));
    let record = event_rules::validate_for_write(&draft, Some(&existing))?;
    let event = db::update_event(&pool, existing.id, &record).await?;

    Ok(Json(EventResponse {
        message: "Event updated successfully",
        event,
    }))
}

#[derive(Serialize)]
pub struct BookingResponse {
    success: bool,
    booking: Booking,
}

async fn book(app_state: &AppState, payload: &NewBooking) -> Result<Booking, AppError> {
    let pool = app_state.db.acquire().await?;
    let record = booking_rules::validate_for_write(payload, &pool).await?;
    db::create_booking(&pool, &record).await
}

pub async fn create_booking_handler(
    State(app_state): State<AppState>,
    payload: Result<Json<NewBooking>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            let e = AppError::from(rejection);
            tracing::warn!(error = %e, "booking failed");
            app_state
                .analytics
                .capture("booking-failed", json!({ "eventId": null }));
            return Err(e);
        }
    };
    match book(&app_state, &payload).await {
        Ok(booking) => {
            app_state.analytics.capture(
                "event-booked",
                json!({ "eventId": payload.event_id, "slug": payload.slug }),
            );
            Ok((
                StatusCode::CREATED,
                Json(BookingResponse {
                    success: true,
                    booking,
                }),
            ))
        }
        Err(e) => {
            tracing::warn!(event_id = payload.event_id, error = %e, "booking failed");
            app_state
                .analytics
                .capture("booking-failed", json!({ "eventId": payload.event_id }));
            Err(e)
        }
    }
}
