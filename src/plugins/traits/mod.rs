pub mod fetcher;
pub mod notifier;

pub use fetcher::SourceFetcher;
pub use notifier::{MessageTransport, Notifier, OutgoingMessage};

#[cfg(test)]
pub use notifier::MockMessageTransport;
