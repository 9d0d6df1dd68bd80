use serde::{Deserialize, Serialize};

pub mod listing;
pub mod sent_record;

// Re-exports for convenience
pub use listing::*;
pub use sent_record::*;

/// Price text the source uses for giveaway listings; never shown in messages.
pub const FREE_PRICE_SENTINEL: &str = "Zu verschenken";

/// Where a filter's notifications go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub chat_id: String,
    pub thread_id: Option<i64>,
}

/// A saved search: resolved from configuration once and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub url: String,
    pub target: DeliveryTarget,
}
