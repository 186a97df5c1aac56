//! Registry events as a `Stream`.
//!
//! [`crate::Registry::subscribe`] hands out a raw broadcast receiver; this
//! module wraps it for callers that prefer stream combinators (progress bars,
//! JSON event logs, tests that `collect` a batch's events).
//!
//! A subscriber that falls more than the channel capacity behind misses the
//! oldest events. The stream logs the gap and carries on; the registry
//! snapshot ([`crate::Registry::entries`]) is always authoritative.

use crate::progress::RegistryEvent;
use crate::registry::Registry;
use std::pin::Pin;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

/// A boxed stream of registry events.
pub type EventStream = Pin<Box<dyn Stream<Item = RegistryEvent> + Send>>;

/// Subscribe to `registry` as a stream. Ends when the registry is dropped.
pub fn registry_events(registry: &Registry) -> EventStream {
    let s = BroadcastStream::new(registry.subscribe()).filter_map(|item| match item {
        Ok(ev) => Some(ev),
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            warn!("Event subscriber lagged; skipped {} events", n);
            None
        }
    });
    Box::pin(s)
}
