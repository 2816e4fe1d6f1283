//! In-process contiguous memory backend.
//!
//! Hands out heap storage with stable, page aligned simulated physical
//! addresses from a bounded arena. Used where no vendor driver is present
//! and to exercise allocation failure (capacity exhaustion).

use super::{MapFlags, PhysAllocation, PhysMemBackend, PhysMemError, PhysMemory};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::ptr::NonNull;
use tracing::{debug, trace};

const PAGE_SIZE: u64 = 4096;
const PHYS_BASE: u64 = 0x1000_0000;

struct Block {
    storage: NonNull<u8>,
    len: usize,
    phys_addr: u64,
}

// SAFETY: `storage` is a uniquely owned heap allocation (leaked Box) that is
// only touched through the arena lock or through mappings handed out to
// PhysMemory, which serialises writers itself.
unsafe impl Send for Block {}

impl Block {
    fn new(len: usize, phys_addr: u64) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut u8;
        Self {
            // Box::into_raw never returns null
            storage: NonNull::new(raw).unwrap_or(NonNull::dangling()),
            len,
            phys_addr,
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.storage.as_ptr(), self.len);
        // SAFETY: `storage`/`len` come from Box::into_raw in Block::new and
        // the block is dropped exactly once, after its last mapping.
        unsafe { drop(Box::from_raw(slice)) };
    }
}

struct Arena {
    blocks: HashMap<u64, Block>,
    next_handle: u64,
    next_phys: u64,
    in_use: usize,
    total_allocs: u64,
    failed_allocs: u64,
}

/// Allocation statistics of a [`ContiguousBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContiguousStats {
    pub capacity: usize,
    pub in_use: usize,
    pub live_blocks: usize,
    pub total_allocs: u64,
    pub failed_allocs: u64,
}

pub struct ContiguousBackend {
    capacity: usize,
    arena: Mutex<Arena>,
}

impl ContiguousBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            arena: Mutex::new(Arena {
                blocks: HashMap::new(),
                next_handle: 1,
                next_phys: PHYS_BASE,
                in_use: 0,
                total_allocs: 0,
                failed_allocs: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ContiguousStats {
        let arena = self.arena.lock();
        ContiguousStats {
            capacity: self.capacity,
            in_use: arena.in_use,
            live_blocks: arena.blocks.len(),
            total_allocs: arena.total_allocs,
            failed_allocs: arena.failed_allocs,
        }
    }
}

impl PhysMemBackend for ContiguousBackend {
    fn name(&self) -> &str {
        "contiguous"
    }

    fn alloc_phys_mem(&self, maxsize: usize) -> Result<PhysAllocation, PhysMemError> {
        let mut arena = self.arena.lock();

        let available = self.capacity - arena.in_use;
        if maxsize > available {
            arena.failed_allocs += 1;
            debug!(
                "contiguous arena exhausted: requested {} bytes, {} available",
                maxsize, available
            );
            return Err(PhysMemError::Exhausted {
                requested: maxsize,
                available,
            });
        }

        let handle = arena.next_handle;
        let phys_addr = arena.next_phys;
        arena.next_handle += 1;
        arena.next_phys += (maxsize as u64).div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE;

        let block = Block::new(maxsize, phys_addr);
        let cpu_addr = block.storage.as_ptr() as usize;
        arena.blocks.insert(handle, block);
        arena.in_use += maxsize;
        arena.total_allocs += 1;

        Ok(PhysAllocation {
            phys_addr,
            cpu_addr,
            handle,
        })
    }

    fn free_phys_mem(&self, mem: &PhysMemory) {
        let mut arena = self.arena.lock();
        if let Some(block) = arena.blocks.remove(&mem.handle()) {
            arena.in_use -= block.len;
        }
    }

    fn map_phys_mem(
        &self,
        mem: &PhysMemory,
        maxsize: usize,
        flags: MapFlags,
    ) -> Result<NonNull<u8>, PhysMemError> {
        let arena = self.arena.lock();
        let block = arena
            .blocks
            .get(&mem.handle())
            .filter(|b| b.phys_addr == mem.phys_addr() && maxsize <= b.len)
            .ok_or(PhysMemError::MapFailed {
                phys_addr: mem.phys_addr(),
            })?;
        trace!(
            "mapped {} bytes of block 0x{:x} ({:?})",
            maxsize,
            block.phys_addr,
            flags
        );
        Ok(block.storage)
    }

    fn unmap_phys_mem(&self, _mem: &PhysMemory) {}
}
