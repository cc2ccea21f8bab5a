//! The shared process state.
//!
//! One [`ProcessState`] per replay session: the process time, the heap
//! allocation registry, open stream and directory handles, known
//! (externally owned) regions, and the memory image. Every mutator has
//! a paired inverter (`add`/`unadd`, `remove`/`unremove`,
//! `close`/`restore`) that precisely undoes it given the same
//! arguments, which is what makes backward movement possible.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use retrace_core::{FunctionIndex, InstrIndex, MemoryArea, MemoryPermission};

use crate::error::StateError;
use crate::memory::MemoryState;

/// Pseudo-address of the pre-registered `stdin` stream.
pub const STDIN_ADDRESS: u64 = 1;
/// Pseudo-address of the pre-registered `stdout` stream.
pub const STDOUT_ADDRESS: u64 = 2;
/// Pseudo-address of the pre-registered `stderr` stream.
pub const STDERR_ADDRESS: u64 = 3;

/// Which standard stream a pre-registered handle denotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StandardStream {
    /// Standard input.
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One live heap allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MallocState {
    address: u64,
    size: u64,
    /// Instructions that allocated and reallocated this block, oldest
    /// first. `Realloc` pushes; its retraction pops.
    allocators: Vec<(FunctionIndex, InstrIndex)>,
}

impl MallocState {
    /// Construct a fresh allocation record.
    pub fn new(
        address: u64,
        size: u64,
        allocator: Option<(FunctionIndex, InstrIndex)>,
    ) -> Self {
        Self {
            address,
            size,
            allocators: allocator.into_iter().collect(),
        }
    }

    /// The allocation's base address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The allocation's current size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The area the allocation currently covers.
    pub fn area(&self) -> MemoryArea {
        MemoryArea::new(self.address, self.size)
    }

    /// The allocator-instruction stack, oldest first.
    pub fn allocators(&self) -> &[(FunctionIndex, InstrIndex)] {
        &self.allocators
    }

    /// Record a reallocating instruction and the new size.
    pub fn push_allocator(
        &mut self,
        allocator: Option<(FunctionIndex, InstrIndex)>,
        new_size: u64,
    ) {
        if let Some(a) = allocator {
            self.allocators.push(a);
        }
        self.size = new_size;
    }

    /// Undo [`push_allocator`](Self::push_allocator).
    pub fn pop_allocator(&mut self, had_allocator: bool, old_size: u64) {
        if had_allocator {
            self.allocators.pop();
        }
        self.size = old_size;
    }
}

/// One open `FILE` stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamState {
    address: u64,
    standard: Option<StandardStream>,
    filename: String,
    mode: String,
    written: Vec<u8>,
}

impl StreamState {
    /// Construct an ordinary (non-standard) stream.
    pub fn new(address: u64, filename: String, mode: String) -> Self {
        Self {
            address,
            standard: None,
            filename,
            mode,
            written: Vec::new(),
        }
    }

    fn standard(address: u64, which: StandardStream) -> Self {
        let (filename, mode) = match which {
            StandardStream::Stdin => ("<stdin>", "r"),
            StandardStream::Stdout => ("<stdout>", "w"),
            StandardStream::Stderr => ("<stderr>", "w"),
        };
        Self {
            address,
            standard: Some(which),
            filename: filename.into(),
            mode: mode.into(),
            written: Vec::new(),
        }
    }

    /// The stream's opaque handle address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Which standard stream this is, if any.
    pub fn standard_stream(&self) -> Option<StandardStream> {
        self.standard
    }

    /// The filename the stream was opened with.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The mode string the stream was opened with.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Everything written to the stream so far, in order.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Append bytes to the write buffer.
    pub fn write(&mut self, bytes: &[u8]) {
        self.written.extend_from_slice(bytes);
    }

    /// Remove the last `n` written bytes.
    pub fn unwrite(&mut self, n: u64) -> Result<(), StateError> {
        let available = self.written.len() as u64;
        if n > available {
            return Err(StateError::StreamBufferUnderflow {
                address: self.address,
                requested: n,
                available,
            });
        }
        self.written.truncate((available - n) as usize);
        Ok(())
    }
}

/// One open directory handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirState {
    address: u64,
    dirname: String,
}

impl DirState {
    /// Construct a directory handle record.
    pub fn new(address: u64, dirname: String) -> Self {
        Self { address, dirname }
    }

    /// The directory's opaque handle address.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// The directory name the handle was opened with.
    pub fn dirname(&self) -> &str {
        &self.dirname
    }
}

/// The shared, reversible process state.
#[derive(Debug)]
pub struct ProcessState {
    process_time: u64,
    mallocs: IndexMap<u64, MallocState>,
    /// Freed allocations, newest last, for `Free` retraction.
    freed_mallocs: Vec<MallocState>,
    streams: IndexMap<u64, StreamState>,
    /// Closed streams, newest last, for `FileClose` retraction.
    closed_streams: Vec<StreamState>,
    dirs: IndexMap<u64, DirState>,
    /// Known regions: base address to (length, permission).
    known_regions: BTreeMap<u64, (u64, MemoryPermission)>,
    memory: MemoryState,
}

impl ProcessState {
    /// Create the initial process state, with the standard streams
    /// pre-registered at their pseudo-addresses.
    pub fn new() -> Self {
        let mut streams = IndexMap::new();
        streams.insert(
            STDIN_ADDRESS,
            StreamState::standard(STDIN_ADDRESS, StandardStream::Stdin),
        );
        streams.insert(
            STDOUT_ADDRESS,
            StreamState::standard(STDOUT_ADDRESS, StandardStream::Stdout),
        );
        streams.insert(
            STDERR_ADDRESS,
            StreamState::standard(STDERR_ADDRESS, StandardStream::Stderr),
        );
        Self {
            process_time: 0,
            mallocs: IndexMap::new(),
            freed_mallocs: Vec::new(),
            streams,
            closed_streams: Vec::new(),
            dirs: IndexMap::new(),
            known_regions: BTreeMap::new(),
            memory: MemoryState::new(),
        }
    }

    // ── Time ────────────────────────────────────────────────────

    /// The current process time.
    pub fn process_time(&self) -> u64 {
        self.process_time
    }

    pub(crate) fn set_process_time(&mut self, t: u64) {
        self.process_time = t;
    }

    // ── Memory ──────────────────────────────────────────────────

    /// The memory image.
    pub fn memory(&self) -> &MemoryState {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut MemoryState {
        &mut self.memory
    }

    // ── Heap allocations ────────────────────────────────────────

    /// Live heap allocations in creation order.
    pub fn mallocs(&self) -> impl Iterator<Item = &MallocState> {
        self.mallocs.values()
    }

    /// The live heap allocation at `address`, if any.
    pub fn malloc_at(&self, address: u64) -> Option<&MallocState> {
        self.mallocs.get(&address)
    }

    pub(crate) fn malloc_at_mut(&mut self, address: u64) -> Option<&mut MallocState> {
        self.mallocs.get_mut(&address)
    }

    /// Register a fresh heap allocation.
    pub fn add_malloc(&mut self, malloc: MallocState) -> Result<(), StateError> {
        let address = malloc.address();
        if self.mallocs.insert(address, malloc).is_some() {
            return Err(StateError::DuplicateHandle { address });
        }
        Ok(())
    }

    /// Invert [`add_malloc`](Self::add_malloc): forget the allocation.
    pub fn unadd_malloc(&mut self, address: u64) -> Result<MallocState, StateError> {
        self.mallocs
            .shift_remove(&address)
            .ok_or(StateError::UnknownMalloc { address })
    }

    /// Release a heap allocation, stashing it for
    /// [`unremove_malloc`](Self::unremove_malloc).
    pub fn remove_malloc(&mut self, address: u64) -> Result<u64, StateError> {
        let malloc = self
            .mallocs
            .shift_remove(&address)
            .ok_or(StateError::UnknownMalloc { address })?;
        let size = malloc.size();
        self.freed_mallocs.push(malloc);
        Ok(size)
    }

    /// Invert [`remove_malloc`](Self::remove_malloc): revive the most
    /// recently freed allocation, which must be at `address`.
    pub fn unremove_malloc(&mut self, address: u64) -> Result<u64, StateError> {
        let malloc = self
            .freed_mallocs
            .pop()
            .ok_or_else(|| StateError::StashMismatch {
                detail: format!("no freed allocation to revive at {address:#x}"),
            })?;
        if malloc.address() != address {
            return Err(StateError::StashMismatch {
                detail: format!(
                    "freed-allocation stash top is {:#x}, expected {address:#x}",
                    malloc.address()
                ),
            });
        }
        let size = malloc.size();
        self.mallocs.insert(address, malloc);
        Ok(size)
    }

    // ── Streams ─────────────────────────────────────────────────

    /// Open streams in registration order (standard streams first).
    pub fn streams(&self) -> impl Iterator<Item = &StreamState> {
        self.streams.values()
    }

    /// The open stream at `address`, if any.
    pub fn stream_at(&self, address: u64) -> Option<&StreamState> {
        self.streams.get(&address)
    }

    /// Register a newly opened stream.
    pub fn add_stream(&mut self, stream: StreamState) -> Result<(), StateError> {
        let address = stream.address();
        if self.streams.insert(address, stream).is_some() {
            return Err(StateError::DuplicateHandle { address });
        }
        Ok(())
    }

    /// Invert [`add_stream`](Self::add_stream): forget the stream.
    pub fn remove_stream(&mut self, address: u64) -> Result<StreamState, StateError> {
        self.streams
            .shift_remove(&address)
            .ok_or(StateError::UnknownStream { address })
    }

    /// Append bytes to an open stream's write buffer.
    pub fn write_stream(&mut self, address: u64, bytes: &[u8]) -> Result<(), StateError> {
        let stream = self
            .streams
            .get_mut(&address)
            .ok_or(StateError::UnknownStream { address })?;
        stream.write(bytes);
        Ok(())
    }

    /// Remove the last `n` bytes from an open stream's write buffer.
    pub fn unwrite_stream(&mut self, address: u64, n: u64) -> Result<(), StateError> {
        let stream = self
            .streams
            .get_mut(&address)
            .ok_or(StateError::UnknownStream { address })?;
        stream.unwrite(n)
    }

    /// Close a stream, preserving it for
    /// [`restore_stream`](Self::restore_stream).
    pub fn close_stream(&mut self, address: u64) -> Result<(), StateError> {
        let stream = self
            .streams
            .shift_remove(&address)
            .ok_or(StateError::UnknownStream { address })?;
        self.closed_streams.push(stream);
        Ok(())
    }

    /// Invert [`close_stream`](Self::close_stream): re-open the most
    /// recently closed stream, which must be at `address`.
    pub fn restore_stream(&mut self, address: u64) -> Result<(), StateError> {
        let stream = self
            .closed_streams
            .pop()
            .ok_or_else(|| StateError::StashMismatch {
                detail: format!("no closed stream to restore at {address:#x}"),
            })?;
        if stream.address() != address {
            return Err(StateError::StashMismatch {
                detail: format!(
                    "closed-stream stash top is {:#x}, expected {address:#x}",
                    stream.address()
                ),
            });
        }
        self.streams.insert(address, stream);
        Ok(())
    }

    // ── Directories ─────────────────────────────────────────────

    /// Open directory handles in registration order.
    pub fn dirs(&self) -> impl Iterator<Item = &DirState> {
        self.dirs.values()
    }

    /// The open directory handle at `address`, if any.
    pub fn dir_at(&self, address: u64) -> Option<&DirState> {
        self.dirs.get(&address)
    }

    /// Register a newly opened directory handle.
    pub fn add_dir(&mut self, dir: DirState) -> Result<(), StateError> {
        let address = dir.address();
        if self.dirs.insert(address, dir).is_some() {
            return Err(StateError::DuplicateHandle { address });
        }
        Ok(())
    }

    /// Close (or un-open) a directory handle.
    pub fn remove_dir(&mut self, address: u64) -> Result<DirState, StateError> {
        self.dirs
            .shift_remove(&address)
            .ok_or(StateError::UnknownDir { address })
    }

    // ── Known regions ───────────────────────────────────────────

    /// Known regions in address order, as `(area, permission)`.
    pub fn known_regions(
        &self,
    ) -> impl Iterator<Item = (MemoryArea, MemoryPermission)> + '_ {
        self.known_regions
            .iter()
            .map(|(&addr, &(len, perm))| (MemoryArea::new(addr, len), perm))
    }

    /// The known region based at `address`, if any.
    pub fn known_region_at(&self, address: u64) -> Option<(MemoryArea, MemoryPermission)> {
        self.known_regions
            .get(&address)
            .map(|&(len, perm)| (MemoryArea::new(address, len), perm))
    }

    /// Register an externally owned region.
    pub fn add_known_region(
        &mut self,
        area: MemoryArea,
        permission: MemoryPermission,
    ) -> Result<(), StateError> {
        if self.known_regions.contains_key(&area.address) {
            return Err(StateError::DuplicateHandle {
                address: area.address,
            });
        }
        self.known_regions
            .insert(area.address, (area.length, permission));
        Ok(())
    }

    /// Forget an externally owned region.
    pub fn remove_known_region(&mut self, address: u64) -> Result<MemoryArea, StateError> {
        let (len, _) = self
            .known_regions
            .remove(&address)
            .ok_or(StateError::UnknownKnownRegion { address })?;
        Ok(MemoryArea::new(address, len))
    }
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_streams_are_preregistered() {
        let p = ProcessState::new();
        let stdout = p.stream_at(STDOUT_ADDRESS).unwrap();
        assert_eq!(stdout.standard_stream(), Some(StandardStream::Stdout));
        assert_eq!(stdout.filename(), "<stdout>");
        assert_eq!(p.streams().count(), 3);
    }

    #[test]
    fn malloc_free_round_trip() {
        let mut p = ProcessState::new();
        p.add_malloc(MallocState::new(0x1000, 16, None)).unwrap();
        assert_eq!(p.malloc_at(0x1000).unwrap().size(), 16);

        let size = p.remove_malloc(0x1000).unwrap();
        assert_eq!(size, 16);
        assert!(p.malloc_at(0x1000).is_none());

        let size = p.unremove_malloc(0x1000).unwrap();
        assert_eq!(size, 16);
        assert_eq!(p.malloc_at(0x1000).unwrap().size(), 16);
    }

    #[test]
    fn unremove_malloc_checks_stash_order() {
        let mut p = ProcessState::new();
        p.add_malloc(MallocState::new(0x1000, 8, None)).unwrap();
        p.add_malloc(MallocState::new(0x2000, 8, None)).unwrap();
        p.remove_malloc(0x1000).unwrap();
        p.remove_malloc(0x2000).unwrap();

        // LIFO: 0x2000 must come back before 0x1000.
        let err = p.unremove_malloc(0x1000).unwrap_err();
        assert!(matches!(err, StateError::StashMismatch { .. }));
        p.unremove_malloc(0x2000).unwrap();
        p.unremove_malloc(0x1000).unwrap();
    }

    #[test]
    fn realloc_allocator_stack() {
        let mut m = MallocState::new(0x1000, 8, Some((FunctionIndex(0), InstrIndex(3))));
        m.push_allocator(Some((FunctionIndex(0), InstrIndex(9))), 32);
        assert_eq!(m.size(), 32);
        assert_eq!(m.allocators().len(), 2);

        m.pop_allocator(true, 8);
        assert_eq!(m.size(), 8);
        assert_eq!(m.allocators(), &[(FunctionIndex(0), InstrIndex(3))]);
    }

    #[test]
    fn stream_write_and_unwrite() {
        let mut p = ProcessState::new();
        p.write_stream(STDOUT_ADDRESS, b"hello ").unwrap();
        p.write_stream(STDOUT_ADDRESS, b"world").unwrap();
        assert_eq!(p.stream_at(STDOUT_ADDRESS).unwrap().written(), b"hello world");

        p.unwrite_stream(STDOUT_ADDRESS, 5).unwrap();
        assert_eq!(p.stream_at(STDOUT_ADDRESS).unwrap().written(), b"hello ");

        let err = p.unwrite_stream(STDOUT_ADDRESS, 100).unwrap_err();
        assert!(matches!(err, StateError::StreamBufferUnderflow { .. }));
    }

    #[test]
    fn close_preserves_stream_for_restore() {
        let mut p = ProcessState::new();
        p.add_stream(StreamState::new(0x5000, "out.txt".into(), "w".into()))
            .unwrap();
        p.write_stream(0x5000, b"data").unwrap();
        p.close_stream(0x5000).unwrap();
        assert!(p.stream_at(0x5000).is_none());

        p.restore_stream(0x5000).unwrap();
        let stream = p.stream_at(0x5000).unwrap();
        assert_eq!(stream.written(), b"data");
        assert_eq!(stream.filename(), "out.txt");
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let mut p = ProcessState::new();
        p.add_dir(DirState::new(0x7000, "/tmp".into())).unwrap();
        let err = p.add_dir(DirState::new(0x7000, "/tmp".into())).unwrap_err();
        assert!(matches!(err, StateError::DuplicateHandle { .. }));
    }

    #[test]
    fn known_regions_round_trip() {
        let mut p = ProcessState::new();
        let area = MemoryArea::new(0x8000, 64);
        p.add_known_region(area, MemoryPermission::ReadOnly).unwrap();
        assert_eq!(
            p.known_region_at(0x8000),
            Some((area, MemoryPermission::ReadOnly))
        );
        let removed = p.remove_known_region(0x8000).unwrap();
        assert_eq!(removed, area);
        assert!(p.known_region_at(0x8000).is_none());
    }
}
