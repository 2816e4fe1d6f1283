//! # Physical Memory Allocator
//!
//! Blocks handed out here carry two addresses: the device-visible physical
//! address a blitter engine reads and writes, and a CPU alias the backend
//! maps on request.
//!
//! ```text
//! ┌──────────────────┐   alloc/free/map/unmap   ┌─────────────────┐
//! │ PhysMemAllocator │─────────────────────────►│ PhysMemBackend  │
//! │ copy/share/span  │                          │ (driver/arena)  │
//! └──────────────────┘                          └─────────────────┘
//! ```
//!
//! A backend only supplies the four primitives. Everything else (zeroed
//! prefixes, copies, sub-region shares) is built on top of them here.
//!
//! Ownership: a top-level [`PhysMemory`] returns its storage to the backend
//! when dropped. A share holds an `Arc` to the top-level block it was cut
//! from, so the storage outlives every view of it.

pub mod contiguous;

pub use contiguous::{ContiguousBackend, ContiguousStats};

use bitflags::bitflags;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, trace, warn};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhysMemError {
    #[error("Could not allocate physical memory block with {size} bytes")]
    AllocFailed { size: usize },

    #[error("Could not map physical memory block at 0x{phys_addr:x}")]
    MapFailed { phys_addr: u64 },

    #[error("Physical memory exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },

    #[error("Physical memory block at 0x{phys_addr:x} is read-only")]
    ReadOnly { phys_addr: u64 },

    #[error("Physical memory block at 0x{phys_addr:x} is already mapped for writing")]
    MapConflict { phys_addr: u64 },
}

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// Properties of a memory block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryFlags: u32 {
        const READONLY = 1 << 0;
        const NO_SHARE = 1 << 1;
        /// Bytes before `offset` are zero
        const ZERO_PREFIXED = 1 << 2;
        /// Bytes after `offset + size` are zero
        const ZERO_PADDED = 1 << 3;
        const PHYSICALLY_CONTIGUOUS = 1 << 4;
    }
}

bitflags! {
    /// Access requested when mapping a block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Layout requested by [`PhysMemAllocator::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationParams {
    pub flags: MemoryFlags,
    /// Alignment mask (alignment - 1)
    pub align: usize,
    /// Reserved bytes before the data
    pub prefix: usize,
    /// Reserved bytes after the data
    pub padding: usize,
}

// ============================================================================
// Backend SPI
// ============================================================================

/// Result of a raw physical allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysAllocation {
    /// Device-visible address
    pub phys_addr: u64,
    /// Backend-defined CPU alias (0 if none)
    pub cpu_addr: usize,
    /// Backend handle identifying the allocation in later calls
    pub handle: u64,
}

/// The four primitives a hardware family implements.
///
/// Thread safety of concurrent calls is the backend's business; the
/// allocator layer adds no locking.
pub trait PhysMemBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Reserve `maxsize` bytes of physically contiguous memory.
    fn alloc_phys_mem(&self, maxsize: usize) -> Result<PhysAllocation, PhysMemError>;

    /// Release the storage behind a top-level block.
    fn free_phys_mem(&self, mem: &PhysMemory);

    /// Map `maxsize` bytes of the block. The pointer must stay valid for
    /// `maxsize` bytes until the matching [`unmap_phys_mem`](Self::unmap_phys_mem).
    fn map_phys_mem(
        &self,
        mem: &PhysMemory,
        maxsize: usize,
        flags: MapFlags,
    ) -> Result<NonNull<u8>, PhysMemError>;

    fn unmap_phys_mem(&self, mem: &PhysMemory);

    /// Whether two blocks are adjacent slices of one allocation.
    fn is_span(&self, _first: &PhysMemory, _second: &PhysMemory) -> bool {
        false
    }
}

// ============================================================================
// Memory Block
// ============================================================================

/// One block of physically contiguous memory (or a view into one).
pub struct PhysMemory {
    backend: Arc<dyn PhysMemBackend>,
    phys_addr: u64,
    cpu_addr: usize,
    handle: u64,
    maxsize: usize,
    align: usize,
    offset: usize,
    size: usize,
    flags: MemoryFlags,
    /// Top-level block owning the storage; `None` if this block owns it
    parent: Option<Arc<PhysMemory>>,
    /// Readers while positive, -1 while mapped for writing
    map_state: AtomicIsize,
    /// CPU address of the current mapping, 0 while unmapped
    mapped_virt_addr: AtomicUsize,
}

impl PhysMemory {
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    pub fn cpu_addr(&self) -> usize {
        self.cpu_addr
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn flags(&self) -> MemoryFlags {
        self.flags
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(MemoryFlags::READONLY)
    }

    pub fn parent(&self) -> Option<&Arc<PhysMemory>> {
        self.parent.as_ref()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Address of the live mapping, if any.
    pub fn mapped_virt_addr(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.mapped_virt_addr.load(Ordering::Acquire) as *mut u8)
    }

    /// The block owning the storage.
    fn owner(&self) -> &PhysMemory {
        self.parent.as_deref().unwrap_or(self)
    }

    /// Map `maxsize` bytes (capped at the block's capacity). The mapping is
    /// released when the returned guard drops.
    pub fn map(&self, maxsize: usize, flags: MapFlags) -> Result<PhysMapping<'_>, PhysMemError> {
        if flags.contains(MapFlags::WRITE) && self.is_readonly() {
            return Err(PhysMemError::ReadOnly {
                phys_addr: self.phys_addr,
            });
        }

        let owner = self.owner();
        acquire_map(&owner.map_state, flags).map_err(|_| PhysMemError::MapConflict {
            phys_addr: self.phys_addr,
        })?;

        let len = maxsize.min(self.maxsize);
        trace!(
            "mapping {} bytes from memory block at phys addr 0x{:x}",
            len,
            self.phys_addr
        );

        let ptr = match self.backend.map_phys_mem(self, len, flags) {
            Ok(ptr) => ptr,
            Err(e) => {
                release_map(&owner.map_state, flags);
                return Err(e);
            }
        };
        self.mapped_virt_addr.store(ptr.as_ptr() as usize, Ordering::Release);

        Ok(PhysMapping {
            mem: self,
            ptr,
            len,
            flags,
        })
    }

    pub fn map_readable(&self) -> Result<PhysMapping<'_>, PhysMemError> {
        self.map(self.maxsize, MapFlags::READ)
    }

    pub fn map_writable(&self) -> Result<PhysMapping<'_>, PhysMemError> {
        self.map(self.maxsize, MapFlags::READ | MapFlags::WRITE)
    }
}

fn acquire_map(state: &AtomicIsize, flags: MapFlags) -> Result<(), ()> {
    if flags.contains(MapFlags::WRITE) {
        state
            .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ())
    } else {
        state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |readers| {
                (readers >= 0).then_some(readers + 1)
            })
            .map(|_| ())
            .map_err(|_| ())
    }
}

/// Returns the number of mappings still live.
fn release_map(state: &AtomicIsize, flags: MapFlags) -> isize {
    if flags.contains(MapFlags::WRITE) {
        state.store(0, Ordering::Release);
        0
    } else {
        state.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl Drop for PhysMemory {
    fn drop(&mut self) {
        if self.parent.is_none() {
            self.backend.free_phys_mem(self);
            info!(
                "freed block at phys addr 0x{:x} with size: {}",
                self.phys_addr, self.size
            );
        }
    }
}

impl fmt::Debug for PhysMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysMemory")
            .field("backend", &self.backend.name())
            .field("phys_addr", &format_args!("0x{:x}", self.phys_addr))
            .field("cpu_addr", &format_args!("0x{:x}", self.cpu_addr))
            .field("maxsize", &self.maxsize)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("shared", &self.parent.is_some())
            .finish()
    }
}

// ============================================================================
// Mapping Guard
// ============================================================================

/// CPU view of a mapped block; unmaps on drop.
pub struct PhysMapping<'a> {
    mem: &'a PhysMemory,
    ptr: NonNull<u8>,
    len: usize,
    flags: MapFlags,
}

impl<'a> PhysMapping<'a> {
    pub fn memory(&self) -> &'a PhysMemory {
        self.mem
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whole mapped capacity, starting at byte 0 of the block.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the backend guarantees `ptr` is valid for `len` bytes until
        // unmap, and map_state rules out a concurrent writer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Whole mapped capacity, `None` unless mapped for writing.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.flags.contains(MapFlags::WRITE) {
            return None;
        }
        // SAFETY: as above; a write mapping is exclusive across the block
        // and all of its shares.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// The logical window `[offset, offset + size)` of the block.
    pub fn data(&self) -> &[u8] {
        let start = self.mem.offset.min(self.len);
        let end = (self.mem.offset + self.mem.size).min(self.len);
        &self.as_slice()[start..end]
    }
}

impl Drop for PhysMapping<'_> {
    fn drop(&mut self) {
        trace!(
            "unmapping memory block at phys addr 0x{:x}",
            self.mem.phys_addr
        );
        self.mem.backend.unmap_phys_mem(self.mem);
        if release_map(&self.mem.owner().map_state, self.flags) == 0 {
            self.mem.mapped_virt_addr.store(0, Ordering::Release);
        }
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// Allocation front end over one backend, chosen at construction.
#[derive(Clone)]
pub struct PhysMemAllocator {
    backend: Arc<dyn PhysMemBackend>,
}

impl PhysMemAllocator {
    pub fn new(backend: Arc<dyn PhysMemBackend>) -> Self {
        info!("physical memory allocator using backend {}", backend.name());
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn PhysMemBackend> {
        &self.backend
    }

    /// Allocate `size` data bytes with the prefix/padding of `params`.
    pub fn alloc(&self, size: usize, params: &AllocationParams) -> Result<PhysMemory, PhysMemError> {
        let Some(maxsize) = size
            .checked_add(params.prefix)
            .and_then(|n| n.checked_add(params.padding))
        else {
            warn!(
                "could not allocate memory block with {} bytes: prefix {} and padding {} overflow",
                size, params.prefix, params.padding
            );
            return Err(PhysMemError::AllocFailed { size });
        };
        match self.allocate(maxsize, params.flags, params.align, params.prefix, size) {
            Ok(mem) => {
                info!(
                    "allocated memory block at phys addr 0x{:x} with {} bytes",
                    mem.phys_addr, size
                );
                Ok(mem)
            }
            Err(e) => {
                warn!("could not allocate memory block with {} bytes: {}", size, e);
                Err(e)
            }
        }
    }

    /// Reserve `maxsize` bytes and describe the `[offset, offset + size)`
    /// window. With `ZERO_PREFIXED` the bytes before `offset` are cleared.
    pub fn allocate(
        &self,
        maxsize: usize,
        flags: MemoryFlags,
        align: usize,
        offset: usize,
        size: usize,
    ) -> Result<PhysMemory, PhysMemError> {
        info!(
            "alloc_internal called: maxsize: {}, align: {}, offset: {}, size: {}",
            maxsize, align, offset, size
        );

        let raw = self.backend.alloc_phys_mem(maxsize)?;
        let mem = PhysMemory {
            backend: Arc::clone(&self.backend),
            phys_addr: raw.phys_addr,
            cpu_addr: raw.cpu_addr,
            handle: raw.handle,
            maxsize,
            align,
            offset,
            size,
            flags,
            parent: None,
            map_state: AtomicIsize::new(0),
            mapped_virt_addr: AtomicUsize::new(0),
        };

        if offset > 0 && flags.contains(MemoryFlags::ZERO_PREFIXED) {
            let mut mapping = mem.map(maxsize, MapFlags::WRITE)?;
            if let Some(bytes) = mapping.as_mut_slice() {
                let end = offset.min(bytes.len());
                bytes[..end].fill(0);
            }
        }

        Ok(mem)
    }

    /// Return a block's storage to the backend. Shares only drop their view.
    pub fn free(&self, mem: PhysMemory) {
        drop(mem);
    }

    pub fn map<'a>(
        &self,
        mem: &'a PhysMemory,
        maxsize: usize,
        flags: MapFlags,
    ) -> Result<PhysMapping<'a>, PhysMemError> {
        mem.map(maxsize, flags)
    }

    pub fn unmap(&self, mapping: PhysMapping<'_>) {
        drop(mapping);
    }

    /// Duplicate the whole capacity of `mem` into a fresh block. The copy's
    /// window starts at `mem.offset + offset`; `size` defaults to what is
    /// left of `mem`'s window after `offset`.
    pub fn copy(
        &self,
        mem: &PhysMemory,
        offset: usize,
        size: Option<usize>,
    ) -> Result<PhysMemory, PhysMemError> {
        let size = size.unwrap_or_else(|| mem.size.saturating_sub(offset));
        let copy = self.allocate(
            mem.maxsize,
            MemoryFlags::empty(),
            mem.align,
            mem.offset + offset,
            size,
        )?;

        {
            let src = mem.map(mem.maxsize, MapFlags::READ)?;
            let mut dest = copy.map(mem.maxsize, MapFlags::WRITE)?;
            if let Some(bytes) = dest.as_mut_slice() {
                let len = bytes.len().min(src.len());
                bytes[..len].copy_from_slice(&src.as_slice()[..len]);
            }
        }

        info!(
            "copied block at 0x{:x} to 0x{:x}; offset: {}, size: {}; source block maxsize: {}, align: {}, offset: {}, size: {}",
            mem.phys_addr, copy.phys_addr, offset, size, mem.maxsize, mem.align, mem.offset, mem.size
        );
        Ok(copy)
    }

    /// A read-only view of `mem` sharing its storage. The view always hangs
    /// off the top-level block, never off another share.
    pub fn share(&self, mem: &Arc<PhysMemory>, offset: usize, size: Option<usize>) -> PhysMemory {
        let size = size.unwrap_or_else(|| mem.size.saturating_sub(offset));
        let parent = match &mem.parent {
            Some(parent) => Arc::clone(parent),
            None => Arc::clone(mem),
        };

        let sub = PhysMemory {
            backend: Arc::clone(&mem.backend),
            phys_addr: mem.phys_addr,
            cpu_addr: mem.cpu_addr,
            handle: mem.handle,
            maxsize: mem.maxsize,
            align: mem.align,
            offset: mem.offset + offset,
            size,
            flags: parent.flags | MemoryFlags::READONLY,
            parent: Some(parent),
            map_state: AtomicIsize::new(0),
            mapped_virt_addr: AtomicUsize::new(0),
        };

        info!(
            "shared block at 0x{:x}; offset: {}, size: {}; source block maxsize: {}, align: {}, offset: {}, size: {}",
            mem.phys_addr, offset, size, mem.maxsize, mem.align, mem.offset, mem.size
        );
        sub
    }

    pub fn is_span(&self, first: &PhysMemory, second: &PhysMemory) -> bool {
        self.backend.is_span(first, second)
    }
}

impl fmt::Debug for PhysMemAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysMemAllocator")
            .field("backend", &self.backend.name())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn allocator() -> PhysMemAllocator {
        PhysMemAllocator::new(Arc::new(ContiguousBackend::new(1 << 20)))
    }

    #[derive(Default)]
    struct FailingBackend {
        allocs: AtomicU32,
        maps: AtomicU32,
        frees: AtomicU32,
    }

    impl PhysMemBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn alloc_phys_mem(&self, maxsize: usize) -> Result<PhysAllocation, PhysMemError> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            Err(PhysMemError::AllocFailed { size: maxsize })
        }

        fn free_phys_mem(&self, _mem: &PhysMemory) {
            self.frees.fetch_add(1, Ordering::SeqCst);
        }

        fn map_phys_mem(
            &self,
            mem: &PhysMemory,
            _maxsize: usize,
            _flags: MapFlags,
        ) -> Result<NonNull<u8>, PhysMemError> {
            self.maps.fetch_add(1, Ordering::SeqCst);
            Err(PhysMemError::MapFailed {
                phys_addr: mem.phys_addr(),
            })
        }

        fn unmap_phys_mem(&self, _mem: &PhysMemory) {}
    }

    #[test]
    fn test_alloc_failure_is_reported() {
        let backend = Arc::new(FailingBackend::default());
        let allocator = PhysMemAllocator::new(backend.clone());
        let params = AllocationParams {
            flags: MemoryFlags::ZERO_PREFIXED,
            prefix: 64,
            ..Default::default()
        };

        for size in [1, 4096, 1 << 20] {
            assert_eq!(
                allocator.alloc(size, &params).unwrap_err(),
                PhysMemError::AllocFailed { size: size + 64 }
            );
        }
        assert_eq!(backend.allocs.load(Ordering::SeqCst), 3);
        assert_eq!(backend.maps.load(Ordering::SeqCst), 0);
        assert_eq!(backend.frees.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_alloc_layout_and_zero_prefix() {
        let allocator = allocator();
        let params = AllocationParams {
            flags: MemoryFlags::ZERO_PREFIXED,
            align: 15,
            prefix: 32,
            padding: 16,
        };
        let mem = allocator.alloc(100, &params).unwrap();
        assert_eq!(mem.maxsize(), 148);
        assert_eq!(mem.offset(), 32);
        assert_eq!(mem.size(), 100);
        assert_eq!(mem.align(), 15);
        assert_ne!(mem.phys_addr(), 0);

        let mapping = mem.map_readable().unwrap();
        assert!(mapping.as_slice()[..32].iter().all(|&b| b == 0));
        assert_eq!(mapping.data().len(), 100);
    }

    #[test]
    fn test_map_tracks_virtual_address() {
        let allocator = allocator();
        let mem = allocator.alloc(64, &AllocationParams::default()).unwrap();
        assert!(mem.mapped_virt_addr().is_none());
        {
            let mut mapping = allocator.map(&mem, 64, MapFlags::WRITE).unwrap();
            assert!(mem.mapped_virt_addr().is_some());
            mapping.as_mut_slice().unwrap().fill(0xAB);
            // exclusive while writing
            assert!(matches!(
                mem.map_readable(),
                Err(PhysMemError::MapConflict { .. })
            ));
            allocator.unmap(mapping);
        }
        assert!(mem.mapped_virt_addr().is_none());

        let a = mem.map_readable().unwrap();
        let b = mem.map_readable().unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        assert!(a.as_slice().iter().all(|&x| x == 0xAB));

        // the address stays published until the last reader is gone
        drop(a);
        assert!(mem.mapped_virt_addr().is_some());
        drop(b);
        assert!(mem.mapped_virt_addr().is_none());
    }

    #[test]
    fn test_alloc_size_overflow() {
        let allocator = allocator();
        let params = AllocationParams {
            prefix: 64,
            ..Default::default()
        };
        assert_eq!(
            allocator.alloc(usize::MAX - 8, &params).unwrap_err(),
            PhysMemError::AllocFailed { size: usize::MAX - 8 }
        );
        let params = AllocationParams {
            padding: usize::MAX,
            ..Default::default()
        };
        assert!(allocator.alloc(1, &params).is_err());
    }

    #[test]
    fn test_copy_is_byte_identical() {
        let allocator = allocator();
        let params = AllocationParams {
            prefix: 8,
            padding: 8,
            ..Default::default()
        };
        let mem = allocator.alloc(48, &params).unwrap();
        {
            let mut mapping = mem.map_writable().unwrap();
            for (i, b) in mapping.as_mut_slice().unwrap().iter_mut().enumerate() {
                *b = i as u8;
            }
        }

        let copy = allocator.copy(&mem, 4, None).unwrap();
        assert_ne!(copy.phys_addr(), mem.phys_addr());
        assert_eq!(copy.maxsize(), mem.maxsize());
        assert_eq!(copy.offset(), 12);
        assert_eq!(copy.size(), 44);
        assert!(copy.parent().is_none());

        let src = mem.map_readable().unwrap();
        let dst = copy.map_readable().unwrap();
        assert_eq!(src.as_slice(), dst.as_slice());
    }

    #[test]
    fn test_copy_default_size_never_negative() {
        let allocator = allocator();
        let mem = allocator.alloc(16, &AllocationParams::default()).unwrap();
        let copy = allocator.copy(&mem, 32, None).unwrap();
        assert_eq!(copy.size(), 0);
    }

    #[test]
    fn test_share_preserves_addresses_and_flattens() {
        let allocator = allocator();
        let params = AllocationParams {
            flags: MemoryFlags::PHYSICALLY_CONTIGUOUS,
            ..Default::default()
        };
        let top = Arc::new(allocator.alloc(256, &params).unwrap());

        let first = Arc::new(allocator.share(&top, 16, None));
        assert_eq!(first.phys_addr(), top.phys_addr());
        assert_eq!(first.cpu_addr(), top.cpu_addr());
        assert_eq!(first.offset(), 16);
        assert_eq!(first.size(), 240);
        assert!(first.is_readonly());
        assert!(first.flags().contains(MemoryFlags::PHYSICALLY_CONTIGUOUS));

        let second = allocator.share(&first, 8, Some(32));
        assert!(Arc::ptr_eq(second.parent().unwrap(), &top));
        assert_eq!(second.phys_addr(), top.phys_addr());
        assert_eq!(second.offset(), 24);
        assert_eq!(second.size(), 32);

        assert!(matches!(
            second.map_writable(),
            Err(PhysMemError::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_share_sees_parent_data() {
        let allocator = allocator();
        let top = Arc::new(allocator.alloc(32, &AllocationParams::default()).unwrap());
        {
            let mut mapping = top.map_writable().unwrap();
            mapping.as_mut_slice().unwrap()[10] = 7;
        }
        let view = allocator.share(&top, 10, Some(4));
        let mapping = view.map_readable().unwrap();
        assert_eq!(mapping.data(), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_is_span_unsupported() {
        let allocator = allocator();
        let a = allocator.alloc(16, &AllocationParams::default()).unwrap();
        let b = allocator.alloc(16, &AllocationParams::default()).unwrap();
        assert!(!allocator.is_span(&a, &b));
    }
}
