//! Messenger task queue: the durable outbound worker that drives the
//! Telegram integration (§4.7).

pub mod provider;
pub mod retry;
pub mod worker;

pub use provider::{MessengerProvider, ProviderError, TelegramProvider};
pub use retry::{MAX_RETRIES, RetryDecision};
pub use worker::MessengerWorker;
