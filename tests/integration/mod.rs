// Shared fakes for the integration tests


use async_trait::async_trait;
use classifieds_watcher::models::{DeliveryTarget, Filter, Listing};
use classifieds_watcher::plugins::{MessageTransport, Notifier, OutgoingMessage, SourceFetcher};
use classifieds_watcher::store::DedupStore;
use classifieds_watcher::{AppError, Pacing, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn filter(name: &str, url: &str) -> Filter {
    Filter {
        name: name.to_string(),
        url: url.to_string(),
        target: DeliveryTarget {
            chat_id: format!("chat-{}", name),
            thread_id: Some(7),
        },
    }
}

pub fn listing(id: &str, title: &str) -> Listing {
    Listing::new(id, title, format!("https://www.kleinanzeigen.de/s-anzeige/{}", id))
}

pub fn pacing(filter_ms: u64, listing_ms: u64) -> Pacing {
    Pacing {
        inter_filter_delay: Duration::from_millis(filter_ms),
        inter_listing_delay: Duration::from_millis(listing_ms),
    }
}

/// Serves whatever page was last set for a URL; URLs marked as failing error out.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<HashMap<String, Vec<Listing>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn set_page(&self, url: &str, listings: Vec<Listing>) {
        self.pages.lock().unwrap().insert(url.to_string(), listings);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(query_url) {
            return Err(AppError::Scraping(format!("connection reset while fetching {}", query_url)));
        }
        Ok(self.pages.lock().unwrap().get(query_url).cloned().unwrap_or_default())
    }
}

/// Blocks inside `fetch` until released, holding the cycle in `Running`.
pub struct GatedFetcher {
    pub inner: Arc<ScriptedFetcher>,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedFetcher {
    pub fn new(inner: Arc<ScriptedFetcher>) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl SourceFetcher for GatedFetcher {
    async fn fetch(&self, query_url: &str) -> Result<Vec<Listing>> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.fetch(query_url).await
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), String>>,
    failing_marks: Mutex<HashSet<String>>,
    lookups: AtomicUsize,
    marks: AtomicUsize,
}

impl MemoryStore {
    /// `mark_sent` errors for this listing id; nothing is recorded.
    pub fn fail_marks_for(&self, listing_id: &str) {
        self.failing_marks.lock().unwrap().insert(listing_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn marks(&self) -> usize {
        self.marks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn is_sent(&self, listing_id: &str, filter_name: &str) -> Result<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .contains_key(&(listing_id.to_string(), filter_name.to_string())))
    }

    async fn mark_sent(&self, listing_id: &str, filter_name: &str, title: &str) -> Result<()> {
        self.marks.fetch_add(1, Ordering::SeqCst);
        if self.failing_marks.lock().unwrap().contains(listing_id) {
            return Err(AppError::Internal("database is locked".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .insert((listing_id.to_string(), filter_name.to_string()), title.to_string());
        Ok(())
    }

    async fn close(&self) {}
}

/// Records every notification; listings registered with `fail_for` error out.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, DeliveryTarget)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn fail_for(&self, listing_id: &str) {
        self.failing.lock().unwrap().insert(listing_id.to_string());
    }

    pub fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn sent(&self) -> Vec<(String, DeliveryTarget)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, listing: &Listing, target: &DeliveryTarget) -> Result<()> {
        self.sent.lock().unwrap().push((listing.id.clone(), target.clone()));
        if self.failing.lock().unwrap().contains(&listing.id) {
            return Err(AppError::Delivery {
                status: 403,
                description: "Forbidden: bot was kicked from the group chat".to_string(),
            });
        }
        Ok(())
    }
}

/// Replays queued send results in order, then succeeds.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<()>>>,
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl ScriptedTransport {
    pub fn push_reply(&self, reply: Result<()>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        self.replies.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
