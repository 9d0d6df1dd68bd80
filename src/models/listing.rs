use serde::{Deserialize, Serialize};

use crate::models::FREE_PRICE_SENTINEL;

/// One ad as scraped from a search result page. Only `id` is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: String,
    pub location: String,
    pub url: String,
    pub image_url: Option<String>,
}

impl Listing {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            price: FREE_PRICE_SENTINEL.to_string(),
            location: String::new(),
            url: url.into(),
            image_url: None,
        }
    }

    /// Whether the price line is worth showing.
    pub fn has_price(&self) -> bool {
        !self.price.is_empty() && self.price != FREE_PRICE_SENTINEL
    }
}
