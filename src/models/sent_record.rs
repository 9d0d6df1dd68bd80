use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A (listing, filter) pair that has already been handled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SentRecord {
    #[sqlx(rename = "id")]
    pub listing_id: String,
    pub filter_name: String,
    pub title: String,
    pub sent_at: DateTime<Utc>,
}
