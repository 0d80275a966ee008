use crate::booking_rules::EventLookup;
use crate::error::AppError;
use crate::models::{Booking, BookingRecord, Event, EventRecord};
use crate::validation::ValidationError;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            overview TEXT NOT NULL,
            image TEXT NOT NULL,
            venue TEXT NOT NULL,
            location TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            mode TEXT NOT NULL CHECK (mode IN ('online', 'offline', 'hybrid')),
            audience TEXT NOT NULL,
            agenda TEXT NOT NULL,
            organizer TEXT NOT NULL,
            tags TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS bookings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL,
            email TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            FOREIGN KEY (event_id) REFERENCES events (id),
            UNIQUE(event_id, email)
        );",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS bookings_event_id ON bookings (event_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS bookings_created_at ON bookings (created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

fn unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[tracing::instrument(skip(pool, record), fields(slug = %record.slug))]
pub async fn create_event(pool: &SqlitePool, record: &EventRecord) -> Result<Event, AppError> {
    let now = Utc::now();
    sqlx::query_as(
        "INSERT INTO events (title, slug, description, overview, image, venue, location, date, time, mode, audience, agenda, organizer, tags, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(&record.title)
    .bind(&record.slug)
    .bind(&record.description)
    .bind(&record.overview)
    .bind(&record.image)
    .bind(&record.venue)
    .bind(&record.location)
    .bind(&record.date)
    .bind(&record.time)
    .bind(record.mode)
    .bind(&record.audience)
    .bind(Json(&record.agenda))
    .bind(&record.organizer)
    .bind(Json(&record.tags))
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if unique_violation(&e) {
            AppError::Conflict(format!("an event with slug '{}' already exists", record.slug))
        } else {
            AppError::from(e)
        }
    })
}

#[tracing::instrument(skip(pool, record), fields(slug = %record.slug))]
pub async fn update_event(
    pool: &SqlitePool,
    id: i64,
    record: &EventRecord,
) -> Result<Event, AppError> {
    sqlx::query_as(
        "UPDATE events SET title = ?, slug = ?, description = ?, overview = ?, image = ?, venue = ?, location = ?,
            date = ?, time = ?, mode = ?, audience = ?, agenda = ?, organizer = ?, tags = ?, updated_at = ?
         WHERE id = ? RETURNING *",
    )
    .bind(&record.title)
    .bind(&record.slug)
    .bind(&record.description)
    .bind(&record.overview)
    .bind(&record.image)
    .bind(&record.venue)
    .bind(&record.location)
    .bind(&record.date)
    .bind(&record.time)
    .bind(record.mode)
    .bind(&record.audience)
    .bind(Json(&record.agenda))
    .bind(&record.organizer)
    .bind(Json(&record.tags))
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        if unique_violation(&e) {
            AppError::Conflict(format!("an event with slug '{}' already exists", record.slug))
        } else {
            AppError::from(e)
        }
    })?
    .ok_or_else(|| AppError::NotFound(format!("event {id} does not exist")))
}

pub async fn get_all_events(pool: &SqlitePool) -> Result<Vec<Event>, AppError> {
    sqlx::query_as("SELECT * FROM events ORDER BY created_at DESC, id DESC")
        .fetch_all(pool)
        .await
        .map_err(AppError::from)
}

pub async fn find_event_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Event>, AppError> {
    sqlx::query_as("SELECT * FROM events WHERE slug = ?")
        .bind(slug)
        .fetch_optional(pool)
        .await
        .map_err(AppError::from)
}

/// Events sharing at least one tag with the event at `slug`, newest first.
///
/// An unknown slug or an event without tags yields an empty list.
#[tracing::instrument(skip(pool))]
pub async fn find_similar_events(
    pool: &SqlitePool,
    slug: &str,
    exclude_self: bool,
) -> Result<Vec<Event>, AppError> {
    let Some(source) = find_event_by_slug(pool, slug).await? else {
        return Ok(Vec::new());
    };
    if source.tags.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as(
        "SELECT * FROM events e
         WHERE EXISTS (
             SELECT 1 FROM json_each(e.tags) t
             WHERE t.value IN (SELECT value FROM json_each(?))
         )
         AND (? = 0 OR e.id <> ?)
         ORDER BY e.created_at DESC, e.id DESC",
    )
    .bind(Json(&source.tags))
    .bind(exclude_self)
    .bind(source.id)
    .fetch_all(pool)
    .await
    .map_err(AppError::from)
}

impl EventLookup for SqlitePool {
    async fn event_exists(&self, event_id: i64) -> Result<bool, AppError> {
        let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(self)
            .await?;
        Ok(found.is_some())
    }
}

#[tracing::instrument(skip(pool, record), fields(event_id = record.event_id))]
pub async fn create_booking(pool: &SqlitePool, record: &BookingRecord) -> Result<Booking, AppError> {
    let now = Utc::now();
    sqlx::query_as(
        "INSERT INTO bookings (event_id, email, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(record.event_id)
    .bind(&record.email)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if unique_violation(&e) {
            AppError::Conflict("this email has already booked this event".to_string())
        } else if foreign_key_violation(&e) {
            ValidationError::EventNotFound.into()
        } else {
            AppError::from(e)
        }
    })
}
