//! Vulkan rendering backend
//!
//! Explicit Vulkan over `ash`, following these resource rules:
//!
//! - every native object is owned by exactly one wrapper; objects still referenced by frames in
//!   flight are handed to the [`ReleaseQueue`](release::ReleaseQueue) and destroyed once the
//!   frame's fence signals
//! - command buffers live in a ring of `max_frames_in_flight` slots; beginning a frame blocks on
//!   that slot's fence
//! - immediate geometry goes through a per-frame vertex cache, program uniforms through a
//!   per-frame dynamic-offset uniform arena, per-draw matrices and color through push constants
//! - render-to-texture pauses the swapchain pass, renders into the texture's framebuffer and
//!   resumes the swapchain pass with its contents preserved

mod arena;
mod backend;
mod buffers;
mod commands;
mod context;
mod descriptors;
mod memory;
mod pipeline;
mod query;
mod release;
mod shader;
mod swapchain;
mod sync;
mod texture;

use ash::vk;
use thiserror::Error;

use crate::render::engine::GraphicsEngine;
use crate::render::RenderError;

pub use backend::VulkanBackend;
pub use context::{SurfaceSource, WindowHandles};
pub use shader::VulkanShaderManager;

/// Renderer over a Vulkan device
pub type VulkanRenderer = GraphicsEngine<VulkanBackend>;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Instance, device or swapchain setup failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested properties
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Why the operation is invalid
        reason: String,
    },

    /// Descriptor pools stayed exhausted after growing
    #[error("Descriptor pool exhausted")]
    DescriptorPoolExhausted,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

impl From<VulkanError> for RenderError {
    fn from(error: VulkanError) -> Self {
        match error {
            VulkanError::InitializationFailed(message) => Self::InitializationFailed(message),
            VulkanError::InvalidOperation { reason } => Self::InvalidOperation(reason),
            VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY)
            | VulkanError::NoSuitableMemoryType
            | VulkanError::DescriptorPoolExhausted => Self::ResourceCreationFailed(error.to_string()),
            VulkanError::Api(_) => Self::BackendError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_keeps_category() {
        let err: RenderError = VulkanError::InvalidOperation { reason: "nested pass".to_string() }.into();
        assert!(matches!(err, RenderError::InvalidOperation(reason) if reason == "nested pass"));

        let err: RenderError = VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).into();
        assert!(matches!(err, RenderError::ResourceCreationFailed(_)));

        let err: RenderError = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(err, RenderError::BackendError(_)));

        let err: RenderError = VulkanError::InitializationFailed("no gpu".to_string()).into();
        assert!(matches!(err, RenderError::InitializationFailed(_)));
    }
}
