//! The reversible memory image.
//!
//! [`MemoryState`] is a sparse byte array — per address, a value byte
//! and an initialization bit — plus the set of live allocations and a
//! strict-LIFO journal of operations. Every forward operation pushes
//! exactly one journal entry; every inverse operation pops exactly one
//! and verifies its arguments against the popped entry, so that
//! `op; inverse_op` restores state bitwise and any divergence between
//! caller and journal surfaces as [`StateError::JournalMismatch`]
//! instead of silent corruption.
//!
//! Bytes outside live allocations are never retained: removing an
//! allocation captures and evicts its cells, and restoring it puts
//! them back. This is what keeps the "every initialized byte lies in a
//! live allocation" invariant structural rather than checked.

use std::collections::BTreeMap;

use retrace_core::MemoryArea;

use crate::error::StateError;

/// One byte of traced memory: its value and whether it has been
/// initialized. Cleared bytes keep their stale value with the
/// initialization bit dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteCell {
    /// The value byte.
    pub value: u8,
    /// Whether the byte is initialized.
    pub initialized: bool,
}

/// A snapshot of one region, as returned by [`MemoryState::region`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    area: MemoryArea,
    bytes: Vec<u8>,
    init: Vec<bool>,
    allocated: bool,
}

impl MemoryRegion {
    /// The area this snapshot covers.
    pub fn area(&self) -> MemoryArea {
        self.area
    }

    /// Value bytes, one per address; uninitialized bytes read as their
    /// stale value (0 if never written).
    pub fn byte_values(&self) -> &[u8] {
        &self.bytes
    }

    /// Initialization bits, one per address.
    pub fn init_bits(&self) -> &[bool] {
        &self.init
    }

    /// Whether the whole area lies within a single live allocation.
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Whether every byte of the region is initialized.
    ///
    /// True for an empty region.
    pub fn is_completely_initialized(&self) -> bool {
        self.init.iter().all(|&b| b)
    }

    /// Whether at least one byte of the region is initialized.
    pub fn is_partially_initialized(&self) -> bool {
        self.init.iter().any(|&b| b)
    }
}

/// One inverted-operation record. Pushed by forward operations,
/// popped (and verified) by inverse operations, strictly LIFO.
#[derive(Debug)]
enum JournalEntry {
    AllocationAdd {
        area: MemoryArea,
    },
    AllocationRemove {
        area: MemoryArea,
        saved: Vec<Option<ByteCell>>,
    },
    AllocationResize {
        address: u64,
        old_length: u64,
        new_length: u64,
        /// Cells trimmed by a shrink; empty for a grow.
        trimmed: Vec<Option<ByteCell>>,
    },
    Block {
        area: MemoryArea,
        prior: Vec<Option<ByteCell>>,
    },
    Copy {
        source: u64,
        destination: u64,
        length: u64,
        prior: Vec<Option<ByteCell>>,
    },
    Clear {
        area: MemoryArea,
        prior_init: Vec<bool>,
    },
}

impl JournalEntry {
    fn describe(&self) -> String {
        match self {
            Self::AllocationAdd { area } => format!("allocation add {area}"),
            Self::AllocationRemove { area, .. } => format!("allocation remove {area}"),
            Self::AllocationResize {
                address,
                old_length,
                new_length,
                ..
            } => format!("allocation resize {address:#x} {old_length} -> {new_length}"),
            Self::Block { area, .. } => format!("block {area}"),
            Self::Copy {
                source,
                destination,
                length,
                ..
            } => format!("copy {length} bytes {source:#x} -> {destination:#x}"),
            Self::Clear { area, .. } => format!("clear {area}"),
        }
    }
}

/// Byte-addressed, sparsely initialized, reversible memory image.
#[derive(Debug, Default)]
pub struct MemoryState {
    cells: BTreeMap<u64, ByteCell>,
    /// Live allocations: first address to length. Disjoint.
    allocations: BTreeMap<u64, u64>,
    journal: Vec<JournalEntry>,
}

impl MemoryState {
    /// Create an empty memory image.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Snapshot the bytes and initialization bits of `area`.
    ///
    /// Succeeds across allocation boundaries; bytes no allocation
    /// covers read as uninitialized.
    pub fn region(&self, area: MemoryArea) -> MemoryRegion {
        let mut bytes = Vec::with_capacity(area.length as usize);
        let mut init = Vec::with_capacity(area.length as usize);
        for addr in area.addresses() {
            match self.cells.get(&addr) {
                Some(cell) => {
                    bytes.push(cell.value);
                    init.push(cell.initialized);
                }
                None => {
                    bytes.push(0);
                    init.push(false);
                }
            }
        }
        MemoryRegion {
            area,
            bytes,
            init,
            allocated: self.is_allocated(area),
        }
    }

    /// Whether `area` lies entirely within one live allocation.
    pub fn is_allocated(&self, area: MemoryArea) -> bool {
        match self.allocation_containing(area.address) {
            Some(alloc) => alloc.contains_area(&area),
            None => false,
        }
    }

    /// The live allocation containing `addr`, if any.
    pub fn allocation_containing(&self, addr: u64) -> Option<MemoryArea> {
        let (&base, &len) = self.allocations.range(..=addr).next_back()?;
        let area = MemoryArea::new(base, len);
        area.contains(addr).then_some(area)
    }

    /// Iterate live allocations in address order.
    pub fn allocations(&self) -> impl Iterator<Item = MemoryArea> + '_ {
        self.allocations
            .iter()
            .map(|(&addr, &len)| MemoryArea::new(addr, len))
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Current depth of the inversion journal.
    pub fn journal_depth(&self) -> usize {
        self.journal.len()
    }

    /// Number of addresses holding a cell (written at least once and
    /// still inside a live allocation).
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    // ── Internal helpers ────────────────────────────────────────

    fn check_disjoint(&self, area: &MemoryArea) -> Result<(), StateError> {
        // The candidate may only conflict with its floor neighbour or
        // the first allocation at/after it.
        if let Some(existing) = self.allocation_containing(area.address) {
            if existing.intersects(area) {
                return Err(StateError::OverlappingAllocation { area: *area });
            }
        }
        if let Some((&base, &len)) = self.allocations.range(area.address..).next() {
            let existing = MemoryArea::new(base, len);
            if existing.intersects(area) {
                return Err(StateError::OverlappingAllocation { area: *area });
            }
        }
        Ok(())
    }

    fn capture(&self, area: &MemoryArea) -> Vec<Option<ByteCell>> {
        area.addresses()
            .map(|addr| self.cells.get(&addr).copied())
            .collect()
    }

    fn restore(&mut self, area: &MemoryArea, saved: &[Option<ByteCell>]) {
        for (addr, cell) in area.addresses().zip(saved) {
            match cell {
                Some(c) => {
                    self.cells.insert(addr, *c);
                }
                None => {
                    self.cells.remove(&addr);
                }
            }
        }
    }

    fn evict(&mut self, area: &MemoryArea) {
        for addr in area.addresses() {
            self.cells.remove(&addr);
        }
    }

    fn pop_journal(&mut self, expected: &str) -> Result<JournalEntry, StateError> {
        self.journal.pop().ok_or_else(|| StateError::JournalMismatch {
            detail: format!("expected {expected}, journal is empty"),
        })
    }

    // ── Allocation tracking (forward) ───────────────────────────

    /// Mark `area` as a live allocation.
    pub fn allocation_add(&mut self, area: MemoryArea) -> Result<(), StateError> {
        self.check_disjoint(&area)?;
        self.allocations.insert(area.address, area.length);
        self.journal.push(JournalEntry::AllocationAdd { area });
        Ok(())
    }

    /// Remove the live allocation `area`, capturing its contents for
    /// later [`allocation_unremove`](Self::allocation_unremove).
    pub fn allocation_remove(&mut self, area: MemoryArea) -> Result<(), StateError> {
        match self.allocations.get(&area.address) {
            Some(&len) if len == area.length => {}
            _ => return Err(StateError::UnknownAllocation { area }),
        }
        let saved = self.capture(&area);
        self.evict(&area);
        self.allocations.remove(&area.address);
        self.journal.push(JournalEntry::AllocationRemove { area, saved });
        Ok(())
    }

    /// Resize the live allocation at `address` from `old_length` to
    /// `new_length`, preserving overlapping contents.
    pub fn allocation_resize(
        &mut self,
        address: u64,
        old_length: u64,
        new_length: u64,
    ) -> Result<(), StateError> {
        match self.allocations.get(&address) {
            Some(&len) if len == old_length => {}
            _ => {
                return Err(StateError::UnknownAllocation {
                    area: MemoryArea::new(address, old_length),
                })
            }
        }

        let trimmed = if new_length < old_length {
            let tail = MemoryArea::new(address + new_length, old_length - new_length);
            let saved = self.capture(&tail);
            self.evict(&tail);
            saved
        } else {
            let extension = MemoryArea::new(address + old_length, new_length - old_length);
            if extension.length > 0 {
                // Temporarily drop the allocation so the extension is
                // checked only against the others.
                self.allocations.remove(&address);
                let check = self.check_disjoint(&extension);
                self.allocations.insert(address, old_length);
                check?;
            }
            Vec::new()
        };

        self.allocations.insert(address, new_length);
        self.journal.push(JournalEntry::AllocationResize {
            address,
            old_length,
            new_length,
            trimmed,
        });
        Ok(())
    }

    // ── Memory contents (forward) ───────────────────────────────

    /// Overwrite `area` with `bytes`, marking every byte initialized.
    ///
    /// `bytes.len()` must equal `area.length`.
    pub fn add_block(&mut self, area: MemoryArea, bytes: &[u8]) -> Result<(), StateError> {
        debug_assert_eq!(bytes.len() as u64, area.length);
        let prior = self.capture(&area);
        for (addr, &value) in area.addresses().zip(bytes) {
            self.cells.insert(
                addr,
                ByteCell {
                    value,
                    initialized: true,
                },
            );
        }
        self.journal.push(JournalEntry::Block { area, prior });
        Ok(())
    }

    /// Copy `length` bytes from `source` to `destination` with their
    /// initialization bits, `memmove`-style: overlap is safe because
    /// the source is snapshotted before the destination is touched.
    pub fn add_copy(
        &mut self,
        source: u64,
        destination: u64,
        length: u64,
    ) -> Result<(), StateError> {
        let src_area = MemoryArea::new(source, length);
        let dst_area = MemoryArea::new(destination, length);
        let src_cells = self.capture(&src_area);
        let prior = self.capture(&dst_area);
        self.restore(&dst_area, &src_cells);
        self.journal.push(JournalEntry::Copy {
            source,
            destination,
            length,
            prior,
        });
        Ok(())
    }

    /// Mark `area` uninitialized. Values are retained; only the
    /// initialization bits drop.
    pub fn add_clear(&mut self, area: MemoryArea) -> Result<(), StateError> {
        let prior_init = area
            .addresses()
            .map(|addr| self.cells.get(&addr).is_some_and(|c| c.initialized))
            .collect();
        for addr in area.addresses() {
            if let Some(cell) = self.cells.get_mut(&addr) {
                cell.initialized = false;
            }
        }
        self.journal.push(JournalEntry::Clear { area, prior_init });
        Ok(())
    }

    // ── Inverse operations ──────────────────────────────────────

    /// Invert [`allocation_add`](Self::allocation_add).
    pub fn allocation_unadd(&mut self, area: MemoryArea) -> Result<(), StateError> {
        let entry = self.pop_journal("allocation add")?;
        match entry {
            JournalEntry::AllocationAdd { area: a } if a == area => {
                self.evict(&area);
                self.allocations.remove(&area.address);
                Ok(())
            }
            other => Err(StateError::JournalMismatch {
                detail: format!(
                    "allocation unadd {area} does not match journal top ({})",
                    other.describe()
                ),
            }),
        }
    }

    /// Invert [`allocation_remove`](Self::allocation_remove),
    /// restoring the captured contents bitwise.
    pub fn allocation_unremove(&mut self, area: MemoryArea) -> Result<(), StateError> {
        let entry = self.pop_journal("allocation remove")?;
        match entry {
            JournalEntry::AllocationRemove { area: a, saved } if a == area => {
                self.check_disjoint(&area)?;
                self.allocations.insert(area.address, area.length);
                self.restore(&area, &saved);
                Ok(())
            }
            other => Err(StateError::JournalMismatch {
                detail: format!(
                    "allocation unremove {area} does not match journal top ({})",
                    other.describe()
                ),
            }),
        }
    }

    /// Invert [`allocation_resize`](Self::allocation_resize), called
    /// with the same arguments the forward call was given.
    pub fn allocation_unresize(
        &mut self,
        address: u64,
        old_length: u64,
        new_length: u64,
    ) -> Result<(), StateError> {
        let entry = self.pop_journal("allocation resize")?;
        match entry {
            JournalEntry::AllocationResize {
                address: a,
                old_length: o,
                new_length: n,
                trimmed,
            } if a == address && o == old_length && n == new_length => {
                if new_length > old_length {
                    // The retracted grow's extension holds no cells by
                    // journal order; evict is a no-op then.
                    let extension =
                        MemoryArea::new(address + old_length, new_length - old_length);
                    self.evict(&extension);
                } else {
                    let tail = MemoryArea::new(address + new_length, old_length - new_length);
                    self.restore(&tail, &trimmed);
                }
                self.allocations.insert(address, old_length);
                Ok(())
            }
            other => Err(StateError::JournalMismatch {
                detail: format!(
                    "allocation unresize {address:#x} {old_length} -> {new_length} does not \
                     match journal top ({})",
                    other.describe()
                ),
            }),
        }
    }

    /// Invert [`add_block`](Self::add_block).
    pub fn remove_block(&mut self, area: MemoryArea) -> Result<(), StateError> {
        let entry = self.pop_journal("block")?;
        match entry {
            JournalEntry::Block { area: a, prior } if a == area => {
                self.restore(&area, &prior);
                Ok(())
            }
            other => Err(StateError::JournalMismatch {
                detail: format!(
                    "block removal {area} does not match journal top ({})",
                    other.describe()
                ),
            }),
        }
    }

    /// Invert [`add_copy`](Self::add_copy).
    pub fn remove_copy(
        &mut self,
        source: u64,
        destination: u64,
        length: u64,
    ) -> Result<(), StateError> {
        let entry = self.pop_journal("copy")?;
        match entry {
            JournalEntry::Copy {
                source: s,
                destination: d,
                length: l,
                prior,
            } if s == source && d == destination && l == length => {
                self.restore(&MemoryArea::new(destination, length), &prior);
                Ok(())
            }
            other => Err(StateError::JournalMismatch {
                detail: format!(
                    "copy removal ({length} bytes {source:#x} -> {destination:#x}) does not \
                     match journal top ({})",
                    other.describe()
                ),
            }),
        }
    }

    /// Invert [`add_clear`](Self::add_clear).
    pub fn remove_clear(&mut self, area: MemoryArea) -> Result<(), StateError> {
        let entry = self.pop_journal("clear")?;
        match entry {
            JournalEntry::Clear { area: a, prior_init } if a == area => {
                for (addr, was_init) in area.addresses().zip(prior_init) {
                    if was_init {
                        if let Some(cell) = self.cells.get_mut(&addr) {
                            cell.initialized = true;
                        }
                    }
                }
                Ok(())
            }
            other => Err(StateError::JournalMismatch {
                detail: format!(
                    "clear removal {area} does not match journal top ({})",
                    other.describe()
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(address: u64, length: u64) -> MemoryArea {
        MemoryArea::new(address, length)
    }

    #[test]
    fn block_then_clear_matches_region_contract() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x2000, 8)).unwrap();
        m.add_block(area(0x2000, 4), &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        m.add_clear(area(0x2001, 2)).unwrap();

        let r = m.region(area(0x2000, 4));
        assert_eq!(r.byte_values(), &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(r.init_bits(), &[true, false, false, true]);
        assert!(r.is_partially_initialized());
        assert!(!r.is_completely_initialized());

        m.remove_clear(area(0x2001, 2)).unwrap();
        let r = m.region(area(0x2000, 4));
        assert_eq!(r.init_bits(), &[true, true, true, true]);

        m.remove_block(area(0x2000, 4)).unwrap();
        let r = m.region(area(0x2000, 4));
        assert!(!r.is_partially_initialized());
    }

    #[test]
    fn overlapping_allocation_add_is_fatal() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 16)).unwrap();
        let err = m.allocation_add(area(0x100F, 4)).unwrap_err();
        assert!(matches!(err, StateError::OverlappingAllocation { .. }));
        // Adjacent is fine.
        m.allocation_add(area(0x1010, 4)).unwrap();
    }

    #[test]
    fn allocation_remove_restores_contents_on_unremove() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 4)).unwrap();
        m.add_block(area(0x1000, 4), &[1, 2, 3, 4]).unwrap();
        m.allocation_remove(area(0x1000, 4)).unwrap();

        assert!(!m.is_allocated(area(0x1000, 4)));
        assert!(!m.region(area(0x1000, 4)).is_partially_initialized());

        m.allocation_unremove(area(0x1000, 4)).unwrap();
        let r = m.region(area(0x1000, 4));
        assert!(r.is_allocated());
        assert_eq!(r.byte_values(), &[1, 2, 3, 4]);
        assert!(r.is_completely_initialized());
    }

    #[test]
    fn resize_shrink_journal_restores_tail() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 8)).unwrap();
        m.add_block(area(0x1000, 8), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        m.allocation_resize(0x1000, 8, 4).unwrap();

        assert!(!m.region(area(0x1004, 4)).is_partially_initialized());
        assert!(m.is_allocated(area(0x1000, 4)));
        assert!(!m.is_allocated(area(0x1000, 8)));

        m.allocation_unresize(0x1000, 8, 4).unwrap();
        let r = m.region(area(0x1000, 8));
        assert_eq!(r.byte_values(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(r.is_completely_initialized());
    }

    #[test]
    fn resize_grow_preserves_contents() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 4)).unwrap();
        m.add_block(area(0x1000, 4), &[9, 9, 9, 9]).unwrap();
        m.allocation_resize(0x1000, 4, 16).unwrap();

        assert!(m.is_allocated(area(0x1000, 16)));
        let r = m.region(area(0x1000, 4));
        assert_eq!(r.byte_values(), &[9, 9, 9, 9]);
        assert!(!m.region(area(0x1004, 12)).is_partially_initialized());

        m.allocation_unresize(0x1000, 4, 16).unwrap();
        assert!(m.is_allocated(area(0x1000, 4)));
        assert!(!m.is_allocated(area(0x1000, 16)));
    }

    #[test]
    fn copy_carries_init_bits() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 8)).unwrap();
        m.allocation_add(area(0x2000, 8)).unwrap();
        m.add_block(area(0x1000, 2), &[7, 8]).unwrap();
        // 0x1002..0x1004 never written.
        m.add_copy(0x1000, 0x2000, 4).unwrap();

        let r = m.region(area(0x2000, 4));
        assert_eq!(&r.byte_values()[..2], &[7, 8]);
        assert_eq!(r.init_bits(), &[true, true, false, false]);
    }

    #[test]
    fn overlapping_copy_round_trips() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 8)).unwrap();
        m.add_block(area(0x1000, 6), &[1, 2, 3, 4, 5, 6]).unwrap();
        // Overlapping forward copy behaves like memmove.
        m.add_copy(0x1000, 0x1002, 4).unwrap();

        let r = m.region(area(0x1000, 6));
        assert_eq!(r.byte_values(), &[1, 2, 1, 2, 3, 4]);

        m.remove_copy(0x1000, 0x1002, 4).unwrap();
        let r = m.region(area(0x1000, 6));
        assert_eq!(r.byte_values(), &[1, 2, 3, 4, 5, 6]);
        assert!(r.is_completely_initialized());
    }

    #[test]
    fn journal_mismatch_is_detected() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 4)).unwrap();
        m.add_block(area(0x1000, 4), &[0; 4]).unwrap();

        // Wrong inverse for the journal top.
        let err = m.allocation_unadd(area(0x1000, 4)).unwrap_err();
        assert!(matches!(err, StateError::JournalMismatch { .. }));

        // Right inverse kind, wrong arguments.
        let err = m.remove_block(area(0x1000, 2)).unwrap_err();
        assert!(matches!(err, StateError::JournalMismatch { .. }));
    }

    #[test]
    fn empty_journal_pop_is_detected() {
        let mut m = MemoryState::new();
        let err = m.remove_clear(area(0x1000, 1)).unwrap_err();
        assert!(matches!(err, StateError::JournalMismatch { .. }));
    }

    #[test]
    fn region_across_allocation_boundary_reads_uninitialized() {
        let mut m = MemoryState::new();
        m.allocation_add(area(0x1000, 4)).unwrap();
        m.add_block(area(0x1000, 4), &[1, 1, 1, 1]).unwrap();

        let r = m.region(area(0x1000, 8));
        assert!(!r.is_allocated());
        assert!(r.is_partially_initialized());
        assert!(!r.is_completely_initialized());
        assert_eq!(r.init_bits()[4..], [false; 4]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Forward op followed by its inverse restores cells,
            /// allocations, and journal depth bitwise.
            #[test]
            fn op_inverse_restores_state(
                base in 0u64..1024,
                len in 1u64..32,
                bytes in proptest::collection::vec(any::<u8>(), 1..32),
                clear_at in 0u64..16,
                clear_len in 1u64..16,
            ) {
                let mut m = MemoryState::new();
                m.allocation_add(MemoryArea::new(base, 64)).unwrap();
                let len = len.min(bytes.len() as u64);
                m.add_block(MemoryArea::new(base, len), &bytes[..len as usize]).unwrap();

                let before_cells: Vec<_> =
                    m.region(MemoryArea::new(base, 64)).byte_values().to_vec();
                let before_init: Vec<_> =
                    m.region(MemoryArea::new(base, 64)).init_bits().to_vec();
                let before_depth = m.journal_depth();

                let clear = MemoryArea::new(base + clear_at, clear_len);
                m.add_clear(clear).unwrap();
                m.remove_clear(clear).unwrap();

                let after = m.region(MemoryArea::new(base, 64));
                prop_assert_eq!(after.byte_values(), &before_cells[..]);
                prop_assert_eq!(after.init_bits(), &before_init[..]);
                prop_assert_eq!(m.journal_depth(), before_depth);
            }

            /// Overlapping copies retract bitwise for any geometry.
            #[test]
            fn overlapping_copy_retracts(
                src_off in 0u64..16,
                dst_off in 0u64..16,
                len in 1u64..16,
                bytes in proptest::collection::vec(any::<u8>(), 32..48),
            ) {
                let base = 0x4000u64;
                let mut m = MemoryState::new();
                m.allocation_add(MemoryArea::new(base, 48)).unwrap();
                m.add_block(
                    MemoryArea::new(base, bytes.len() as u64),
                    &bytes,
                ).unwrap();

                let before: Vec<_> =
                    m.region(MemoryArea::new(base, 48)).byte_values().to_vec();

                m.add_copy(base + src_off, base + dst_off, len).unwrap();
                m.remove_copy(base + src_off, base + dst_off, len).unwrap();

                let after = m.region(MemoryArea::new(base, 48));
                prop_assert_eq!(after.byte_values(), &before[..]);
            }
        }
    }
}
