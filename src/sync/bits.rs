//! Atomic bit vector with lock-free single-bit updates.

use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = 64;

/// A fixed-capacity vector of bits stored in 64-bit atomic words.
///
/// Capacity is rounded up to whole words, [`size`](Self::size) reports the
/// rounded value. Scans over several words are not atomic as a whole.
#[derive(Debug, Default)]
pub struct AtomicBits {
    words: Box<[AtomicU64]>,
}

impl AtomicBits {
    pub fn new(nbits: usize) -> Self {
        let nwords = nbits.div_ceil(WORD_BITS);
        Self {
            words: (0..nwords).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of addressable bits.
    pub fn size(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    pub fn get(&self, pos: usize) -> bool {
        let (word, mask) = locate(pos);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    /// Set bit `pos` to `value`, returns the previous state.
    pub fn set(&self, pos: usize, value: bool) -> bool {
        let (word, mask) = locate(pos);
        let prev = if value {
            self.words[word].fetch_or(mask, Ordering::AcqRel)
        } else {
            self.words[word].fetch_and(!mask, Ordering::AcqRel)
        };
        prev & mask != 0
    }

    pub fn clear(&self, pos: usize) -> bool {
        self.set(pos, false)
    }

    /// Flip bit `pos` if `toggle`, returns the previous state.
    pub fn xor(&self, pos: usize, toggle: bool) -> bool {
        let (word, mask) = locate(pos);
        let prev = self.words[word].fetch_xor(if toggle { mask } else { 0 }, Ordering::AcqRel);
        prev & mask != 0
    }

    /// `true` if every bit equals `value`.
    pub fn all(&self, value: bool) -> bool {
        let expected = if value { u64::MAX } else { 0 };
        self.words
            .iter()
            .all(|w| w.load(Ordering::Relaxed) == expected)
    }

    /// `true` if at least one bit equals `value`.
    pub fn any(&self, value: bool) -> bool {
        let rejected = if value { 0 } else { u64::MAX };
        self.words
            .iter()
            .any(|w| w.load(Ordering::Relaxed) != rejected)
    }

    pub fn iter(&self, pos: usize) -> Iter<'_> {
        Iter { bits: self, pos }
    }
}

#[inline]
fn locate(pos: usize) -> (usize, u64) {
    (pos / WORD_BITS, 1u64 << (pos % WORD_BITS))
}

/// Cursor over an [`AtomicBits`].
///
/// [`big_inc1`](Iter::big_inc1) is meant for sparse scans: it lands on the
/// next set bit and jumps over zero words without probing their bits.
#[derive(Clone, Copy)]
pub struct Iter<'a> {
    bits: &'a AtomicBits,
    pos: usize,
}

impl<'a> Iter<'a> {
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn valid(&self) -> bool {
        self.pos < self.bits.size()
    }

    pub fn is_set(&self) -> bool {
        self.bits.get(self.pos)
    }

    pub fn set(&self, value: bool) -> bool {
        self.bits.set(self.pos, value)
    }

    pub fn clear(&self) -> bool {
        self.bits.clear(self.pos)
    }

    pub fn xor(&self, toggle: bool) -> bool {
        self.bits.xor(self.pos, toggle)
    }

    /// Advance by one bit.
    pub fn inc(&mut self) -> &mut Self {
        self.pos = (self.pos + 1).min(self.bits.size());
        self
    }

    /// Advance by one bit, skipping words that are all zero.
    pub fn big_inc1(&mut self) -> &mut Self {
        let size = self.bits.size();
        self.pos = (self.pos + 1).min(size);
        while self.pos < size {
            let word = self.pos / WORD_BITS;
            let pending = self.bits.words[word].load(Ordering::Relaxed) >> (self.pos % WORD_BITS);
            if pending != 0 {
                self.pos += pending.trailing_zeros() as usize;
                break;
            }
            self.pos = (word + 1) * WORD_BITS;
        }
        self.pos = self.pos.min(size);
        self
    }
}
