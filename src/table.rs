//! The modified-page table (C3): an inline, open-addressed, linear-probing hash table from
//! page number to an owned dirty buffer, with amortised doubling.
//!
//! The single-block-of-memory layout this kind of table is traditionally built on is
//! encapsulated here as a `Vec<Option<Bucket>>` the table owns outright; `expand` replaces that
//! `Vec` wholesale rather than patching a raw pointer back into the caller.
use log::{debug, trace, warn};

use crate::alloc::AlignedBuffer;
use crate::error::TableError;

/// Initial (and minimum) bucket count. Must stay a power of two.
const INITIAL_BUCKETS: usize = 8;

/// A single occupied slot: the dirty buffer for one page, plus the overflow size it was
/// allocated for.
#[derive(Debug)]
pub struct Bucket {
    pub page_num: u64,
    pub overflow_size: u64,
    pub buffer: AlignedBuffer,
}

enum InsertAttempt {
    Installed,
    Full(AlignedBuffer),
}

enum ExpandOutcome {
    Ok,
    NoMem,
}

/// The modified-page table itself.
#[derive(Debug)]
pub struct ModifiedPageTable {
    buckets: Vec<Option<Bucket>>,
    modified_pages: usize,
}

impl ModifiedPageTable {
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(INITIAL_BUCKETS);
        buckets.resize_with(INITIAL_BUCKETS, || None);
        Self {
            buckets,
            modified_pages: 0,
        }
    }

    /// Number of pages with a dirty buffer in this transaction.
    pub fn len(&self) -> usize {
        self.modified_pages
    }

    pub fn is_empty(&self) -> bool {
        self.modified_pages == 0
    }

    /// Current bucket count (always a power of two, `>= 8`).
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Find the dirty buffer for `page_num`, if any.
    pub fn lookup(&self, page_num: u64) -> Option<&Bucket> {
        let n = self.buckets.len();
        let start = (page_num % n as u64) as usize;
        for step in 0..n {
            let idx = (start + step) % n;
            match &self.buckets[idx] {
                Some(bucket) if bucket.page_num == page_num => return Some(bucket),
                None => return None,
                _ => continue,
            }
        }
        None
    }

    pub fn lookup_mut(&mut self, page_num: u64) -> Option<&mut Bucket> {
        let n = self.buckets.len();
        let start = (page_num % n as u64) as usize;
        for step in 0..n {
            let idx = (start + step) % n;
            match &self.buckets[idx] {
                Some(bucket) if bucket.page_num == page_num => {
                    return self.buckets[idx].as_mut();
                }
                None => return None,
                _ => continue,
            }
        }
        None
    }

    /// Install a fresh dirty buffer for `page_num`. Only called after a `lookup`
    /// came back empty. Tolerates `Expand` running out of memory by letting the table grow
    /// past its normal load factor rather than failing the caller's `modify_page`.
    pub fn insert(
        &mut self,
        page_num: u64,
        overflow_size: u64,
        buffer: AlignedBuffer,
    ) -> Result<(), TableError> {
        match self.try_insert(page_num, overflow_size, buffer)? {
            InsertAttempt::Installed => {
                let threshold = (self.buckets.len() * 3) / 4;
                if self.modified_pages < threshold {
                    return Ok(());
                }
                trace!(
                    "modified-page table at {}/{} buckets, expanding",
                    self.modified_pages,
                    self.buckets.len()
                );
                self.expand_until_under_threshold();
                Ok(())
            }
            InsertAttempt::Full(buffer) => match self.expand() {
                ExpandOutcome::Ok => self.insert(page_num, overflow_size, buffer),
                ExpandOutcome::NoMem => Err(TableError::OutOfMemory),
            },
        }
    }

    fn try_insert(
        &mut self,
        page_num: u64,
        overflow_size: u64,
        buffer: AlignedBuffer,
    ) -> Result<InsertAttempt, TableError> {
        let n = self.buckets.len();
        let start = (page_num % n as u64) as usize;
        for step in 0..n {
            let idx = (start + step) % n;
            match &self.buckets[idx] {
                Some(bucket) if bucket.page_num == page_num => {
                    return Err(TableError::AlreadyAllocated { page_num });
                }
                None => {
                    self.buckets[idx] = Some(Bucket {
                        page_num,
                        overflow_size,
                        buffer,
                    });
                    self.modified_pages += 1;
                    return Ok(InsertAttempt::Installed);
                }
                _ => continue,
            }
        }
        Ok(InsertAttempt::Full(buffer))
    }

    /// Allocate-new, move buckets, free-old. Returns `NoMem` rather than
    /// panicking if the new allocation can't be made; the caller decides how to tolerate that.
    fn expand(&mut self) -> ExpandOutcome {
        let old_n = self.buckets.len();
        let new_n = old_n * 2;

        let mut new_buckets: Vec<Option<Bucket>> = Vec::new();
        if new_buckets.try_reserve_exact(new_n).is_err() {
            return ExpandOutcome::NoMem;
        }
        new_buckets.resize_with(new_n, || None);

        for bucket in self.buckets.drain(..).flatten() {
            let start = (bucket.page_num % new_n as u64) as usize;
            let mut idx = start;
            loop {
                if new_buckets[idx].is_none() {
                    new_buckets[idx] = Some(bucket);
                    break;
                }
                idx = (idx + 1) % new_n;
            }
        }

        debug!("modified-page table expanded {old_n} -> {new_n} buckets");
        self.buckets = new_buckets;
        ExpandOutcome::Ok
    }

    /// Expands repeatedly, tolerating out-of-memory at any step, until `modified_pages < n/2`
    /// holds again. A single `Expand` is not always enough to restore that: if an earlier
    /// expansion was tolerated as out-of-memory, the table may already sit past its normal 75%
    /// ceiling, so doubling once can still leave it at or above the post-expand half-full mark.
    fn expand_until_under_threshold(&mut self) {
        loop {
            match self.expand() {
                ExpandOutcome::Ok => {
                    if self.modified_pages < self.buckets.len() / 2 {
                        return;
                    }
                }
                ExpandOutcome::NoMem => {
                    warn!(
                        "modified-page table expansion failed (out of memory); \
                         tolerating load factor beyond 75%"
                    );
                    return;
                }
            }
        }
    }

    /// Removes and returns the bucket for `page_num`, if present (used by `commit`, after a
    /// successful write, to release ownership of the buffer).
    ///
    /// Uses the standard backward-shift deletion for linear probing: simply nulling the slot
    /// would break the placement invariant for any later entry whose probe sequence passes
    /// through it, so entries downstream of the hole are shifted back as far as their own
    /// home slot allows.
    pub fn remove(&mut self, page_num: u64) -> Option<Bucket> {
        let n = self.buckets.len();
        let start = (page_num % n as u64) as usize;
        let mut idx = start;
        let mut found = None;
        for _ in 0..n {
            match &self.buckets[idx] {
                Some(bucket) if bucket.page_num == page_num => {
                    found = Some(idx);
                    break;
                }
                None => break,
                _ => idx = (idx + 1) % n,
            }
        }
        let hole_idx = found?;
        let removed = self.buckets[hole_idx].take();
        self.modified_pages -= 1;

        let mut hole = hole_idx;
        let mut scan = (hole + 1) % n;
        loop {
            let Some(bucket) = self.buckets[scan].as_ref() else {
                break;
            };
            let home = (bucket.page_num % n as u64) as usize;
            if !Self::wraps_within(hole, home, scan) {
                let bucket = self.buckets[scan].take().expect("checked Some above");
                self.buckets[hole] = Some(bucket);
                hole = scan;
            }
            scan = (scan + 1) % n;
        }

        removed
    }

    /// True if `home`, `scan`'s ideal slot, still lies in the cyclic interval `(hole, scan]`
    /// and therefore cannot be moved back into `hole` without breaking its own reachability.
    fn wraps_within(hole: usize, home: usize, scan: usize) -> bool {
        if hole <= scan {
            hole < home && home <= scan
        } else {
            home > hole || home <= scan
        }
    }

    /// Iterates every occupied bucket's page number, for `commit`/`close` to walk.
    pub fn page_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.buckets
            .iter()
            .filter_map(|bucket| bucket.as_ref().map(|bucket| bucket.page_num))
    }

    /// Verifies the uniqueness and linear-probing placement invariants.
    /// Only used by tests; a violation here is a bug in this module, not user error.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        use std::collections::HashSet;
        let n = self.buckets.len();
        let mut seen = HashSet::new();
        for (i, bucket) in self.buckets.iter().enumerate() {
            let Some(bucket) = bucket else { continue };
            assert!(seen.insert(bucket.page_num), "duplicate page_num in table");
            let start = (bucket.page_num % n as u64) as usize;
            let mut j = start;
            while j != i {
                assert!(
                    self.buckets[j].is_some(),
                    "placement invariant violated between {start} and {i}"
                );
                j = (j + 1) % n;
            }
        }
    }
}

impl Default for ModifiedPageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> AlignedBuffer {
        AlignedBuffer::alloc_zeroed(crate::page::PAGE_SIZE, crate::page::PAGE_ALIGNMENT).unwrap()
    }

    #[test]
    fn insert_then_lookup() {
        let mut table = ModifiedPageTable::new();
        table.insert(3, 8192, buf()).unwrap();
        assert!(table.lookup(3).is_some());
        assert!(table.lookup(4).is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut table = ModifiedPageTable::new();
        table.insert(3, 8192, buf()).unwrap();
        assert!(matches!(
            table.insert(3, 8192, buf()),
            Err(TableError::AlreadyAllocated { page_num: 3 })
        ));
    }

    #[test]
    fn expands_and_preserves_entries() {
        let mut table = ModifiedPageTable::new();
        for i in 0..1024u64 {
            table.insert(i, 8192, buf()).unwrap();
        }
        assert_eq!(table.len(), 1024);
        assert!(table.bucket_count().is_power_of_two());
        assert!(table.bucket_count() as f64 >= 1024.0 / 0.75);
        table.check_invariants();
        for i in 0..1024u64 {
            assert!(table.lookup(i).is_some());
        }
    }

    #[test]
    fn load_factor_holds_after_expansion() {
        let mut table = ModifiedPageTable::new();
        for i in 0..2048u64 {
            table.insert(i, 8192, buf()).unwrap();
        }
        assert!(
            table.len() < table.bucket_count() / 2,
            "modified_pages ({}) must drop under n/2 ({}) once an expansion has run",
            table.len(),
            table.bucket_count() / 2
        );
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let mut table = ModifiedPageTable::new();
        table.insert(3, 8192, buf()).unwrap();
        assert!(table.remove(3).is_some());
        assert!(table.lookup(3).is_none());
        assert_eq!(table.len(), 0);
        table.insert(3, 8192, buf()).unwrap();
        assert!(table.lookup(3).is_some());
    }
}
