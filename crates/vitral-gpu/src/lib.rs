//! Vulkan plumbing for the Vitral engine.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - Manual memory-type selection
//! - Command buffer helpers and one-shot submission
//! - Synchronization primitives
//! - Layout-tracked image transitions
//! - Descriptor set helpers
//! - Surface management

pub mod barrier;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod surface;
pub mod sync;

pub use barrier::TrackedImage;
pub use context::{memory_type_from_properties, DeviceContext, DeviceContextBuilder};
pub use descriptors::{write_combined_image_sampler, write_uniform_buffer, DescriptorPool};
pub use error::{GpuError, Result};
pub use surface::{SurfaceContext, SurfaceInfo};
pub use sync::{create_fence, create_semaphore, FrameSemaphores};
