use tokio::sync::Mutex;

/// A bounded-capacity-one buffer: writes unconditionally overwrite, reads
/// clear-and-take. The transport's substitute for a queue everywhere only
/// the most recent value matters and nothing should ever back up behind
/// stale data — the latest complete AU, the latest decoded frame.
pub struct LatestSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Overwrite the slot, dropping whatever was in it.
    pub async fn put(&self, value: T) {
        let mut guard = self.inner.lock().await;
        *guard = Some(value);
    }

    /// Take the current value, leaving the slot empty.
    pub async fn take(&self) -> Option<T> {
        let mut guard = self.inner.lock().await;
        guard.take()
    }

    /// Whether the slot currently holds a value, without consuming it.
    pub async fn is_some(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overwrite_drops_previous_value() {
        let slot: LatestSlot<u32> = LatestSlot::new();
        slot.put(1).await;
        slot.put(2).await;
        assert_eq!(slot.take().await, Some(2));
        assert_eq!(slot.take().await, None);
    }

    #[tokio::test]
    async fn take_clears_slot() {
        let slot: LatestSlot<&str> = LatestSlot::new();
        slot.put("frame").await;
        assert!(slot.is_some().await);
        assert_eq!(slot.take().await, Some("frame"));
        assert!(!slot.is_some().await);
    }
}
