//! # physblit Core
//!
//! Video transform plumbing for hardware blitters that work on physically
//! contiguous memory: a physical memory allocator, caps negotiation that
//! keeps the display aspect ratio, and the per-frame passthrough/blit
//! orchestration of a transform stage.

// ============================================================================
// Physical Memory
// ============================================================================
pub mod phys_mem;
pub mod buffer;
pub mod buffer_pool;

// ============================================================================
// Formats / Negotiation
// ============================================================================
pub mod fraction;
pub mod video_format;
pub mod caps;
pub mod video_info;
pub mod negotiate;

// ============================================================================
// Transform Stage
// ============================================================================
pub mod blitter;
pub mod transform;
pub mod settings;

pub use blitter::{Blitter, DeinterlaceMode, RotationMode};
pub use caps::{Caps, Structure};
pub use negotiate::PadDirection;
pub use phys_mem::{PhysMemAllocator, PhysMemBackend, PhysMemory};
pub use settings::{Property, PropertyValue, TransformSettings};
pub use transform::{FlowError, VideoTransform};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
