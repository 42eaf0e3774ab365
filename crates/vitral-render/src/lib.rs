//! Presentation and rendering resource lifecycle for the Vitral engine.
//!
//! This crate provides:
//! - Swapchain generation management (swapchain, depth buffer, render pass,
//!   framebuffers) rebuilt as a unit on resize
//! - Graphics pipeline construction from SPIR-V shader pairs
//! - Texture upload with a direct linear-tiled path and a staged
//!   linear-to-optimal fallback
//! - Vertex (shape) and per-draw uniform (instance) resources
//! - The single-frame-in-flight draw loop from acquisition to presentation

pub mod depth;
pub mod frame;
pub mod generation;
pub mod pipeline;
pub mod render_pass;
pub mod renderer;
pub mod shape;
pub mod swapchain;
pub mod texture;

pub use depth::DepthBuffer;
pub use frame::FrameState;
pub use generation::SwapchainGeneration;
pub use pipeline::{Pipeline, Shader};
pub use renderer::{Renderer, RendererConfig};
pub use shape::{Instance, Shape};
pub use swapchain::Swapchain;
pub use texture::{AlphaMode, Texture};
