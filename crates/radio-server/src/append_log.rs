//! Append-only storage with lock-free reads.
//!
//! Slots live in segments that double in size and are allocated once, so an element
//! never moves after it is published. Writers serialize on a mutex, fill their slots,
//! then publish the new length with `Release`. Readers load the length with `Acquire`
//! and only ever touch slots below it.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

const FIRST_SEGMENT: usize = 16;
const SEGMENTS: usize = usize::BITS as usize - 3;

pub(crate) struct AppendLog<T> {
    segments: [OnceLock<Box<[OnceLock<T>]>>; SEGMENTS],
    len: AtomicUsize,
    writer: Mutex<()>,
}

/// Map a flat index to `(segment, offset)`.
fn slot_of(index: usize) -> (usize, usize) {
    let n = index / FIRST_SEGMENT + 1;
    let segment = (usize::BITS - 1 - n.leading_zeros()) as usize;
    let start = FIRST_SEGMENT * ((1usize << segment) - 1);
    (segment, index - start)
}

impl<T> AppendLog<T> {
    pub(crate) fn new() -> Self {
        Self {
            segments: [const { OnceLock::new() }; SEGMENTS],
            len: AtomicUsize::new(0),
            writer: Mutex::new(()),
        }
    }

    /// Number of published elements.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len() {
            return None;
        }
        let (segment, offset) = slot_of(index);
        self.segments[segment].get()?.get(offset)?.get()
    }

    /// Iterate over the elements published when the call was made.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.len();
        (0..len).filter_map(move |i| self.get(i))
    }

    /// Append a contiguous run of elements and publish them together.
    ///
    /// Returns the index range the run occupies.
    pub(crate) fn extend(&self, items: impl IntoIterator<Item = T>) -> Range<usize> {
        let _guard = self.writer.lock().unwrap_or_else(|err| err.into_inner());
        let start = self.len.load(Ordering::Relaxed);
        let mut next = start;
        for item in items {
            let (segment, offset) = slot_of(next);
            let slots = self.segments[segment].get_or_init(|| {
                (0..FIRST_SEGMENT << segment)
                    .map(|_| OnceLock::new())
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            });
            // Slots at or past `len` are only written while holding `writer`.
            let _ = slots[offset].set(item);
            next += 1;
        }
        self.len.store(next, Ordering::Release);
        start..next
    }

    pub(crate) fn push(&self, item: T) -> usize {
        self.extend(std::iter::once(item)).start
    }
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self::new()
    }
}
