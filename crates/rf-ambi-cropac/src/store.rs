//! Publication of codec parameters to the audio thread
//!
//! The configuration side swaps a new `Arc<CodecParameters>` into the store
//! under a short write lock and bumps the published generation. The audio side
//! ([`CodecReader`]) notices the generation change, takes the new handle with
//! `try_read` (never blocking) and sends the handle it replaces back through
//! an SPSC ring, so the last reference is always released on the
//! configuration side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::codec::CodecParameters;
use crate::error::{CropacError, CropacResult};

/// Capacity of the retire ring
const RETIRE_CAPACITY: usize = 16;

/// Holder of the currently published codec
pub struct CodecStore {
    slot: RwLock<Option<Arc<CodecParameters>>>,
    published: AtomicU64,
    retired: Mutex<Consumer<Arc<CodecParameters>>>,
    retire_tx: Mutex<Option<Producer<Arc<CodecParameters>>>>,
}

impl CodecStore {
    pub fn new() -> Self {
        let (tx, rx) = RingBuffer::new(RETIRE_CAPACITY);
        Self {
            slot: RwLock::new(None),
            published: AtomicU64::new(0),
            retired: Mutex::new(rx),
            retire_tx: Mutex::new(Some(tx)),
        }
    }

    /// Replace the published codec
    pub fn publish(&self, params: Arc<CodecParameters>) {
        let generation = params.generation();
        let previous = {
            let mut slot = self.slot.write();
            slot.replace(params)
        };
        self.published.store(generation, Ordering::Release);
        drop(previous);
        self.collect_retired();
    }

    /// Generation of the published codec, 0 if none
    pub fn published_generation(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Current codec, for configuration-side queries
    pub fn current(&self) -> Option<Arc<CodecParameters>> {
        self.slot.read().clone()
    }

    /// Release handles the audio thread has finished with
    pub fn collect_retired(&self) -> usize {
        let mut retired = self.retired.lock();
        let mut count = 0;
        while retired.pop().is_ok() {
            count += 1;
        }
        count
    }

    /// Attach the (single) audio-side reader
    pub fn reader(self: &Arc<Self>) -> CropacResult<CodecReader> {
        let retire = self
            .retire_tx
            .lock()
            .take()
            .ok_or_else(|| CropacError::InvalidConfig("codec reader already attached".into()))?;
        Ok(CodecReader {
            store: Arc::clone(self),
            current: None,
            seen: 0,
            retire,
        })
    }
}

impl Default for CodecStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio-side view of a [`CodecStore`]
pub struct CodecReader {
    store: Arc<CodecStore>,
    current: Option<Arc<CodecParameters>>,
    seen: u64,
    retire: Producer<Arc<CodecParameters>>,
}

impl CodecReader {
    /// Pick up a newly published codec; never blocks or deallocates
    ///
    /// Returns true if the handle changed.
    pub fn refresh(&mut self) -> bool {
        let published = self.store.published.load(Ordering::Acquire);
        if published == self.seen {
            return false;
        }
        // the outgoing handle must have somewhere to go
        if self.current.is_some() && self.retire.is_full() {
            return false;
        }
        let Some(slot) = self.store.slot.try_read() else {
            return false;
        };
        let next = slot.clone();
        drop(slot);

        self.seen = published;
        let changed = match (&self.current, &next) {
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            (None, None) => false,
            _ => true,
        };
        if let Some(old) = std::mem::replace(&mut self.current, next) {
            // capacity checked above
            let _ = self.retire.push(old);
        }
        changed
    }

    pub fn current(&self) -> Option<&CodecParameters> {
        self.current.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.current.as_ref().map_or(0, |c| c.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecConfig;

    fn params(generation: u64) -> Arc<CodecParameters> {
        let freqs: Vec<f32> = (0..5).map(|k| k as f32 * 6000.0).collect();
        Arc::new(
            CodecParameters::build(&CodecConfig::default(), &freqs, 48000, None, generation)
                .unwrap(),
        )
    }

    #[test]
    fn test_single_reader() {
        let store = Arc::new(CodecStore::new());
        assert!(store.reader().is_ok());
        assert!(store.reader().is_err());
    }

    #[test]
    fn test_publish_and_refresh() {
        let store = Arc::new(CodecStore::new());
        let mut reader = store.reader().unwrap();

        assert!(!reader.refresh());
        assert!(reader.current().is_none());

        store.publish(params(1));
        assert!(store.is_ready());
        assert!(reader.refresh());
        assert_eq!(reader.generation(), 1);
        assert!(!reader.refresh());

        store.publish(params(2));
        assert!(reader.refresh());
        assert_eq!(reader.generation(), 2);

        // generation 1 travelled back through the retire ring
        assert_eq!(store.collect_retired(), 1);
    }

    #[test]
    fn test_refresh_skips_while_writer_holds_lock() {
        let store = Arc::new(CodecStore::new());
        let mut reader = store.reader().unwrap();
        store.publish(params(1));

        let guard = store.slot.write();
        assert!(!reader.refresh());
        drop(guard);
        assert!(reader.refresh());
    }
}
