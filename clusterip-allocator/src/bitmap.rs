// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Allocation bitmap.
//!
//! One bit per usable offset of a range, set when the offset is allocated. The bitmap does no
//! locking; it is only ever mutated through the
//! [RangeAllocator](crate::allocator::RangeAllocator) which owns it.

use thiserror::Error;

const WORD_BITS: u64 = u64::BITS as u64;

/// Bitmap errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BitmapError {
    /// The offset is already marked allocated.
    #[error("offset {0} already allocated")]
    AlreadyAllocated(u64),
    /// The offset is not below the bitmap capacity.
    #[error("offset {0} outside of bitmap with capacity {1}")]
    OutOfBounds(u64, u64),
    /// Every offset is allocated.
    #[error("no free offset left")]
    Exhausted,
}

/// Allocated/free state of the offsets `0..capacity`.
// Impl Note:
// Bits past `capacity` in the last word are permanently set, so a word scan never yields an
// offset outside the bitmap. They are not counted as allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationBitmap {
    words: Vec<u64>,
    capacity: u64,
    free: u64,
}

impl AllocationBitmap {
    /// Creates a bitmap with all `capacity` offsets free.
    pub fn new(capacity: u64) -> Self {
        let mut words = vec![0u64; capacity.div_ceil(WORD_BITS) as usize];
        let tail = capacity % WORD_BITS;
        if tail != 0 {
            let last = words.len() - 1;
            words[last] = u64::MAX << tail;
        }
        Self {
            words,
            capacity,
            free: capacity,
        }
    }

    /// Number of offsets.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of free offsets.
    pub fn free(&self) -> u64 {
        self.free
    }

    /// Number of allocated offsets.
    pub fn allocated(&self) -> u64 {
        self.capacity - self.free
    }

    /// Returns true if `offset` is inside the bitmap and not allocated.
    pub fn is_free(&self, offset: u64) -> bool {
        offset < self.capacity && {
            let (word, mask) = locate(offset);
            self.words[word] & mask == 0
        }
    }

    /// Marks `offset` allocated.
    pub fn mark_allocated(&mut self, offset: u64) -> Result<(), BitmapError> {
        if offset >= self.capacity {
            return Err(BitmapError::OutOfBounds(offset, self.capacity));
        }
        let (word, mask) = locate(offset);
        if self.words[word] & mask != 0 {
            return Err(BitmapError::AlreadyAllocated(offset));
        }
        self.words[word] |= mask;
        self.free -= 1;
        Ok(())
    }

    /// Marks `offset` free. Freeing a free (or out of bounds) offset is a no-op.
    ///
    /// Returns true if the offset was allocated before.
    pub fn mark_free(&mut self, offset: u64) -> bool {
        if offset >= self.capacity {
            return false;
        }
        let (word, mask) = locate(offset);
        if self.words[word] & mask == 0 {
            return false;
        }
        self.words[word] &= !mask;
        self.free += 1;
        true
    }

    /// Returns the first free offset at or after `hint`, wrapping around at the capacity.
    ///
    /// `hint` may be any value; it is reduced modulo the capacity. The offset is not marked.
    pub fn next_free(&self, hint: u64) -> Result<u64, BitmapError> {
        if self.free == 0 {
            return Err(BitmapError::Exhausted);
        }
        let (start_word, _) = locate(hint % self.capacity);
        let start_bit = hint % self.capacity % WORD_BITS;

        // Bits below the hint in the first word are only visited after the wrap.
        let head = self.words[start_word] | !(u64::MAX << start_bit);
        if head != u64::MAX {
            return Ok(offset_in(start_word, head));
        }
        let len = self.words.len();
        (1..=len)
            .map(|i| (start_word + i) % len)
            .find(|&word| self.words[word] != u64::MAX)
            .map(|word| offset_in(word, self.words[word]))
            .ok_or(BitmapError::Exhausted)
    }
}

fn locate(offset: u64) -> (usize, u64) {
    ((offset / WORD_BITS) as usize, 1 << (offset % WORD_BITS))
}

fn offset_in(word: usize, bits: u64) -> u64 {
    word as u64 * WORD_BITS + u64::from(bits.trailing_ones())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_double_allocation() {
        let mut bitmap = AllocationBitmap::new(100);
        for offset in [0, 63, 64, 99] {
            bitmap.mark_allocated(offset).unwrap();
            assert!(!bitmap.is_free(offset));
            assert_eq!(
                bitmap.mark_allocated(offset),
                Err(BitmapError::AlreadyAllocated(offset))
            );
        }
        assert_eq!(bitmap.free(), 96);
        assert_eq!(bitmap.allocated(), 4);
    }

    #[test]
    fn should_free_idempotently() {
        let mut bitmap = AllocationBitmap::new(10);
        assert!(!bitmap.mark_free(3), "never allocated");
        assert_eq!(bitmap.free(), 10);

        bitmap.mark_allocated(3).unwrap();
        assert!(bitmap.mark_free(3));
        assert!(!bitmap.mark_free(3));
        assert!(bitmap.is_free(3));
        assert_eq!(bitmap.free(), 10);
    }

    #[test]
    fn should_reject_out_of_bounds_offsets() {
        let mut bitmap = AllocationBitmap::new(65);
        assert_eq!(
            bitmap.mark_allocated(65),
            Err(BitmapError::OutOfBounds(65, 65))
        );
        assert!(!bitmap.is_free(65));
        assert!(!bitmap.mark_free(100));
        assert_eq!(bitmap.free(), 65);
    }

    #[test]
    fn should_scan_forward_from_hint() {
        let mut bitmap = AllocationBitmap::new(200);
        assert_eq!(bitmap.next_free(0), Ok(0));
        assert_eq!(bitmap.next_free(130), Ok(130));

        for offset in 130..140 {
            bitmap.mark_allocated(offset).unwrap();
        }
        assert_eq!(bitmap.next_free(130), Ok(140));
        // Hints are reduced modulo the capacity.
        assert_eq!(bitmap.next_free(330), Ok(140));
    }

    #[test]
    fn should_wrap_around() {
        let mut bitmap = AllocationBitmap::new(130);
        for offset in 5..130 {
            bitmap.mark_allocated(offset).unwrap();
        }
        assert_eq!(bitmap.next_free(70), Ok(0));
        for offset in 0..4 {
            bitmap.mark_allocated(offset).unwrap();
        }
        // The only free offset lies below the hint inside the starting word.
        assert_eq!(bitmap.next_free(10), Ok(4));
    }

    #[test]
    fn should_never_return_offsets_past_capacity() {
        let mut bitmap = AllocationBitmap::new(70);
        let mut hint = 0;
        for _ in 0..70 {
            let offset = bitmap.next_free(hint).unwrap();
            assert!(offset < 70);
            bitmap.mark_allocated(offset).unwrap();
            hint += 37;
        }
        assert_eq!(bitmap.free(), 0);
        assert_eq!(bitmap.next_free(69), Err(BitmapError::Exhausted));
    }

    #[test]
    fn should_exhaust_single_offset_bitmap() {
        let mut bitmap = AllocationBitmap::new(1);
        assert_eq!(bitmap.next_free(12345), Ok(0));
        bitmap.mark_allocated(0).unwrap();
        assert_eq!(bitmap.next_free(0), Err(BitmapError::Exhausted));
    }
}
