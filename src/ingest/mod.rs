//! Ingestion scheduler
//!
//! Polls the quote source for every tracked symbol on a fixed cadence
//! and publishes one PriceEvent per successful fetch onto the event log,
//! keyed by symbol so per-symbol ordering is preserved by the log.

pub mod publisher;
pub mod quote_source;
pub mod retry;
pub mod scheduler;

pub use publisher::{EventPublisher, KafkaEventPublisher};
pub use quote_source::{QuoteSource, YahooQuoteSource};
pub use retry::RetryPolicy;
pub use scheduler::PollScheduler;
