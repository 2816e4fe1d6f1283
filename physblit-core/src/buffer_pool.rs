//! # Buffer Pools
//!
//! Recycles output buffers between frames. A physical pool hands out
//! blitter-addressable memory from a [`PhysMemAllocator`]; a system pool
//! stands in for a downstream proposal that knows nothing about physical
//! memory.
//!
//! Also home of [`AllocationQuery`], the pool negotiation exchanged with
//! downstream before streaming starts.

use crate::buffer::{Memory, VideoBuffer, VideoFrameFlags, VideoMeta};
use crate::caps::Caps;
use crate::phys_mem::{AllocationParams, PhysMemAllocator, PhysMemError, PhysMemory};
use crate::video_info::VideoInfo;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Buffer pool is not active")]
    Inactive,

    #[error("Cannot reconfigure an active buffer pool")]
    Active,

    #[error("Buffer pool exhausted ({max} buffers outstanding)")]
    Exhausted { max: u32 },

    #[error("Allocation failed: {0}")]
    Alloc(#[from] PhysMemError),
}

/// Capabilities a pool can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PoolOption {
    /// Buffers are physically contiguous
    PhysMem,
    /// Buffers carry a [`VideoMeta`]
    VideoMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferPoolConfig {
    pub caps: Caps,
    pub size: usize,
    pub min_buffers: u32,
    /// 0 means unlimited
    pub max_buffers: u32,
    pub options: Vec<PoolOption>,
}

impl BufferPoolConfig {
    pub fn new(caps: Caps, size: usize, min_buffers: u32, max_buffers: u32) -> Self {
        Self {
            caps,
            size,
            min_buffers,
            max_buffers,
            options: Vec::new(),
        }
    }

    pub fn set_params(&mut self, caps: Caps, size: usize, min_buffers: u32, max_buffers: u32) {
        self.caps = caps;
        self.size = size;
        self.min_buffers = min_buffers;
        self.max_buffers = max_buffers;
    }

    pub fn add_option(&mut self, option: PoolOption) {
        if !self.options.contains(&option) {
            self.options.push(option);
        }
    }

    pub fn has_option(&self, option: PoolOption) -> bool {
        self.options.contains(&option)
    }
}

// ============================================================================
// Buffer Pool
// ============================================================================

pub struct BufferPool {
    name: String,
    /// `None` for system memory pools
    allocator: Option<PhysMemAllocator>,
    supported: Vec<PoolOption>,
    config: Mutex<BufferPoolConfig>,
    free: Mutex<Vec<PhysMemory>>,
    active: AtomicBool,
    outstanding: AtomicUsize,
    allocated: AtomicU64,
    recycled: AtomicU64,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub outstanding: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
}

impl BufferPool {
    /// Pool of physically contiguous buffers.
    pub fn new_physical(name: impl Into<String>, allocator: PhysMemAllocator) -> Self {
        Self::with_parts(
            name.into(),
            Some(allocator),
            vec![PoolOption::PhysMem, PoolOption::VideoMeta],
        )
    }

    /// Pool of plain heap buffers.
    pub fn new_system(name: impl Into<String>) -> Self {
        Self::with_parts(name.into(), None, vec![PoolOption::VideoMeta])
    }

    fn with_parts(name: String, allocator: Option<PhysMemAllocator>, supported: Vec<PoolOption>) -> Self {
        Self {
            name,
            allocator,
            supported,
            config: Mutex::new(BufferPoolConfig::new(Caps::new_empty(), 0, 0, 0)),
            free: Mutex::new(Vec::new()),
            active: AtomicBool::new(false),
            outstanding: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the pool can be configured with `option`.
    pub fn has_option(&self, option: PoolOption) -> bool {
        self.supported.contains(&option)
    }

    pub fn config(&self) -> BufferPoolConfig {
        self.config.lock().clone()
    }

    pub fn set_config(&self, config: BufferPoolConfig) -> Result<(), PoolError> {
        if self.is_active() {
            return Err(PoolError::Active);
        }
        debug!(
            "pool {}: size {} min {} max {} options {:?}",
            self.name, config.size, config.min_buffers, config.max_buffers, config.options
        );
        *self.config.lock() = config;
        self.free.lock().clear();
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Activating preallocates `min_buffers`; deactivating drops idle ones.
    pub fn set_active(&self, active: bool) -> Result<(), PoolError> {
        if active == self.is_active() {
            return Ok(());
        }

        if active {
            let config = self.config();
            let mut free = self.free.lock();
            while free.len() < config.min_buffers as usize {
                match self.allocate_memory(config.size)? {
                    Memory::Physical(mem) => match Arc::try_unwrap(mem) {
                        Ok(mem) => free.push(mem),
                        Err(_) => break,
                    },
                    Memory::System(_) => break,
                }
            }
        } else {
            self.free.lock().clear();
        }

        self.active.store(active, Ordering::Release);
        Ok(())
    }

    /// Get a buffer from the pool (or allocate a new one).
    pub fn acquire(&self) -> Result<VideoBuffer, PoolError> {
        if !self.is_active() {
            return Err(PoolError::Inactive);
        }

        let config = self.config();
        let max = config.max_buffers as usize;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .map_err(|_| PoolError::Exhausted {
                max: config.max_buffers,
            })?;

        let recycled = self.free.lock().pop();
        let memory = match recycled {
            Some(mem) => {
                self.recycled.fetch_add(1, Ordering::Relaxed);
                Memory::Physical(Arc::new(mem))
            }
            None => match self.allocate_memory(config.size) {
                Ok(memory) => memory,
                Err(e) => {
                    self.outstanding.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
            },
        };

        let mut buffer = VideoBuffer::new(memory);
        if config.has_option(PoolOption::VideoMeta) {
            if let Ok(info) = VideoInfo::from_caps(&config.caps) {
                buffer.video_meta = Some(VideoMeta {
                    width: info.width,
                    height: info.height,
                    format: info.format,
                    flags: VideoFrameFlags::empty(),
                });
            }
        }
        Ok(buffer)
    }

    /// Return a buffer to the pool. Physical memory is kept for reuse when
    /// nothing else references it.
    pub fn release(&self, buffer: VideoBuffer) {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok();

        if !self.is_active() {
            return;
        }
        if let Memory::Physical(mem) = buffer.memory {
            if let Ok(mem) = Arc::try_unwrap(mem) {
                if mem.parent().is_none() && mem.size() == self.config.lock().size {
                    self.free.lock().push(mem);
                }
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.free.lock().len(),
            outstanding: self.outstanding.load(Ordering::Acquire),
            total_allocated: self.allocated.load(Ordering::Relaxed),
            total_recycled: self.recycled.load(Ordering::Relaxed),
        }
    }

    fn allocate_memory(&self, size: usize) -> Result<Memory, PoolError> {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        match &self.allocator {
            Some(allocator) => {
                let mem = allocator.alloc(size, &AllocationParams::default())?;
                Ok(Memory::Physical(Arc::new(mem)))
            }
            None => Ok(Memory::System(Bytes::from(vec![0u8; size]))),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.name)
            .field("supported", &self.supported)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Allocation Query
// ============================================================================

/// One pool proposed by downstream.
#[derive(Debug, Clone)]
pub struct PoolProposal {
    pub pool: Option<Arc<BufferPool>>,
    pub size: usize,
    pub min_buffers: u32,
    pub max_buffers: u32,
}

/// Pool negotiation for the output side.
#[derive(Debug, Clone)]
pub struct AllocationQuery {
    pub caps: Caps,
    pub pools: Vec<PoolProposal>,
}

impl AllocationQuery {
    pub fn new(caps: Caps) -> Self {
        Self {
            caps,
            pools: Vec::new(),
        }
    }

    pub fn add_pool(&mut self, pool: Option<Arc<BufferPool>>, size: usize, min: u32, max: u32) {
        self.pools.push(PoolProposal {
            pool,
            size,
            min_buffers: min,
            max_buffers: max,
        });
    }

    pub fn set_nth_pool(&mut self, index: usize, proposal: PoolProposal) {
        if let Some(slot) = self.pools.get_mut(index) {
            *slot = proposal;
        }
    }

    pub fn n_pools(&self) -> usize {
        self.pools.len()
    }
}
