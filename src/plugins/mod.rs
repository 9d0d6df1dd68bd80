pub mod traits;
pub mod notifiers;

pub use traits::{MessageTransport, Notifier, OutgoingMessage, SourceFetcher};
