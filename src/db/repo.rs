use super::model::NewSubject;
use crate::model::{ConversationRecord, DesiredTime, NewReading, Reading, Subject, TimeOfDay};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open sqlite database")?;
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_subject(pool: &Pool, subject: &NewSubject) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO users (name, phone, language, crop, profile, thread_id, notify_hour, notify_minute) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(subject.name.as_deref())
    .bind(&subject.phone)
    .bind(&subject.language)
    .bind(&subject.crop)
    .bind(subject.profile.as_deref())
    .bind(subject.thread_id.as_deref())
    .bind(subject.notify_at.map(|t| t.hour() as i64))
    .bind(subject.notify_at.map(|t| t.minute() as i64))
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert subject {}", subject.phone))?;
    Ok(rec.get::<i64, _>("id"))
}

/// Set or clear the daily notification time of a subject.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn set_notify_time(pool: &Pool, user_id: i64, at: Option<TimeOfDay>) -> Result<()> {
    let res = sqlx::query(
        "UPDATE users SET notify_hour = ?, notify_minute = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(at.map(|t| t.hour() as i64))
    .bind(at.map(|t| t.minute() as i64))
    .bind(user_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("subject {} not found", user_id));
    }
    Ok(())
}

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn insert_reading(
    pool: &Pool,
    user_id: i64,
    reading: &NewReading,
    at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO readings (user_id, ph, nitrogen, phosphorus, potassium, temperature, moisture, conductivity, battery, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(reading.ph)
    .bind(reading.nitrogen)
    .bind(reading.phosphorus)
    .bind(reading.potassium)
    .bind(reading.temperature)
    .bind(reading.moisture)
    .bind(reading.conductivity)
    .bind(reading.battery)
    .bind(at)
    .bind(at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

/// Subjects with a configured notification time, ordered by id.
#[instrument(skip_all)]
pub async fn list_desired_times(pool: &Pool) -> Result<Vec<DesiredTime>> {
    let rows = sqlx::query(
        "SELECT id, phone, notify_hour, notify_minute FROM users \
         WHERE notify_hour IS NOT NULL AND notify_minute IS NOT NULL ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| -> Result<DesiredTime> {
            let subject_id: i64 = row.get("id");
            let time = TimeOfDay::new(row.get("notify_hour"), row.get("notify_minute"))
                .with_context(|| format!("subject {subject_id} has an invalid notify time"))?;
            Ok(DesiredTime {
                subject_id,
                contact: row.get("phone"),
                time,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn find_subject_by_phone(pool: &Pool, phone: &str) -> Result<Option<Subject>> {
    let row = sqlx::query(
        "SELECT id, name, phone, language, crop, profile, thread_id, notify_hour, notify_minute \
         FROM users WHERE phone = ?",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(subject_from_row).transpose()
}

fn subject_from_row(row: &SqliteRow) -> Result<Subject> {
    let id: i64 = row.get("id");
    let hour: Option<i64> = row.get("notify_hour");
    let minute: Option<i64> = row.get("notify_minute");
    let notify_at = match (hour, minute) {
        (Some(h), Some(m)) => Some(
            TimeOfDay::new(h, m)
                .with_context(|| format!("subject {id} has an invalid notify time"))?,
        ),
        _ => None,
    };
    Ok(Subject {
        id,
        name: row.get("name"),
        contact: row.get("phone"),
        language: row.get("language"),
        crop: row.get("crop"),
        profile: row
            .get::<Option<String>, _>("profile")
            .filter(|s| !s.trim().is_empty()),
        thread_id: row
            .get::<Option<String>, _>("thread_id")
            .filter(|s| !s.trim().is_empty()),
        notify_at,
    })
}

/// Most recent `limit` readings for a subject, newest first.
#[instrument(skip_all, fields(user_id = user_id, limit = limit))]
pub async fn recent_readings(pool: &Pool, user_id: i64, limit: i64) -> Result<Vec<Reading>> {
    let rows = sqlx::query(
        "SELECT id, user_id, ph, nitrogen, phosphorus, potassium, temperature, moisture, conductivity, battery, created_at, updated_at \
         FROM readings WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| Reading {
            id: row.get("id"),
            subject_id: row.get("user_id"),
            ph: row.get("ph"),
            nitrogen: row.get("nitrogen"),
            phosphorus: row.get("phosphorus"),
            potassium: row.get("potassium"),
            temperature: row.get("temperature"),
            moisture: row.get("moisture"),
            conductivity: row.get("conductivity"),
            battery: row.get("battery"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
        .collect())
}

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn insert_conversation(
    pool: &Pool,
    user_id: i64,
    prompt_label: &str,
    response: &str,
    follow_up: bool,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO messages (user_id, message, response, follow_up, created_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(prompt_label)
    .bind(response)
    .bind(follow_up)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to persist conversation")?;
    Ok(rec.get("id"))
}

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn list_conversations(pool: &Pool, user_id: i64) -> Result<Vec<ConversationRecord>> {
    let rows = sqlx::query(
        "SELECT id, user_id, message, response, follow_up, created_at FROM messages WHERE user_id = ? ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ConversationRecord {
            id: row.get("id"),
            subject_id: row.get("user_id"),
            prompt_label: row.get("message"),
            response: row.get("response"),
            follow_up: row.get("follow_up"),
            created_at: row.get("created_at"),
        })
        .collect())
}
