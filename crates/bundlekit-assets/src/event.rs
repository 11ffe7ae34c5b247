//! Lifecycle events for diagnostics.

use std::collections::VecDeque;

/// Events emitted by the bundle store and asset cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A bundle finished loading and became resident.
    BundleLoaded {
        /// The bundle name.
        bundle: String,
    },

    /// A bundle's count reached zero and it was unloaded.
    BundleUnloaded {
        /// The bundle name.
        bundle: String,
    },

    /// An asset was extracted and cached.
    AssetLoaded {
        /// The owning bundle.
        bundle: String,
        /// The asset name.
        asset: String,
    },

    /// The last handle to an asset was released and the entry removed.
    AssetReleased {
        /// The owning bundle.
        bundle: String,
        /// The asset name.
        asset: String,
    },

    /// A bundle or asset load failed.
    LoadFailed {
        /// The bundle the failure is attributed to.
        bundle: String,
        /// The asset name, for asset-level failures.
        asset: Option<String>,
        /// Error message.
        error: String,
    },

    /// An asset load lost its race against the deadline.
    TimedOut {
        /// The owning bundle.
        bundle: String,
        /// The asset name.
        asset: String,
    },
}

impl CacheEvent {
    /// The bundle this event relates to.
    pub fn bundle(&self) -> &str {
        match self {
            CacheEvent::BundleLoaded { bundle }
            | CacheEvent::BundleUnloaded { bundle }
            | CacheEvent::AssetLoaded { bundle, .. }
            | CacheEvent::AssetReleased { bundle, .. }
            | CacheEvent::LoadFailed { bundle, .. }
            | CacheEvent::TimedOut { bundle, .. } => bundle,
        }
    }

    /// Check if this is a failure or timeout event.
    pub fn is_failure(&self) -> bool {
        matches!(self, CacheEvent::LoadFailed { .. } | CacheEvent::TimedOut { .. })
    }
}

/// A bounded buffer of events, drained by the host.
///
/// When full, the oldest event is discarded.
#[derive(Debug)]
pub struct CacheEventBuffer {
    events: VecDeque<CacheEvent>,
    capacity: usize,
    dropped: u64,
}

impl CacheEventBuffer {
    /// Create a buffer holding at most `capacity` events. A capacity of zero
    /// disables recording.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    /// Push an event to the buffer.
    pub fn push(&mut self, event: CacheEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Drain all events from the buffer, oldest first.
    pub fn drain(&mut self) -> Vec<CacheEvent> {
        self.events.drain(..).collect()
    }

    /// Get an iterator over events without draining.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEvent> {
        self.events.iter()
    }

    /// Number of events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Get the number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if there are any events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(name: &str) -> CacheEvent {
        CacheEvent::BundleLoaded {
            bundle: name.to_string(),
        }
    }

    #[test]
    fn test_oldest_event_dropped_when_full() {
        let mut buffer = CacheEventBuffer::new(2);
        buffer.push(loaded("a"));
        buffer.push(loaded("b"));
        buffer.push(loaded("c"));

        assert_eq!(buffer.dropped(), 1);
        let bundles: Vec<String> = buffer.drain().iter().map(|e| e.bundle().to_string()).collect();
        assert_eq!(bundles, vec!["b", "c"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let mut buffer = CacheEventBuffer::new(0);
        buffer.push(loaded("a"));
        assert!(buffer.is_empty());
    }
}
