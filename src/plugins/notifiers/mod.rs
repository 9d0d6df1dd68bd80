// Notifier implementations
pub mod telegram;

pub use telegram::{TelegramClient, TelegramNotifier};
