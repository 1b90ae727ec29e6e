//! Stable error surface for the core crate.

use thiserror::Error;

/// Every fallible operation in this crate returns `Result<T, VulkanError>`.
#[derive(Debug, Error)]
pub enum VulkanError {
    /// The memory allocator could not satisfy a request from any compatible block.
    #[error("out of device memory (requested {requested} bytes)")]
    OutOfDeviceMemory {
        /// Size of the failed request, in bytes.
        requested: u64,
    },

    /// A resource was created or used with a format the device does not support
    /// for the requested usage.
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(ash::vk::Format),

    /// A resource was created or used with a usage flag combination the
    /// operation does not support.
    #[error("unsupported usage for this operation: {0}")]
    UnsupportedUsage(String),

    /// A subresource range (aspect/mip/layer) falls outside the owning image.
    #[error("invalid subresource range: {0}")]
    InvalidSubresource(String),

    /// Shader reflection merge across pipeline stages disagreed on descriptor
    /// type/count or push-constant offset/size.
    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    /// A descriptor or push constant named at bind time was not found in any
    /// bound shader stage.
    #[error("missing descriptor or push constant: {0}")]
    MissingDescriptor(String),

    /// Reading a shader binary, reflection manifest, or pipeline cache file
    /// failed.
    #[error("file I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    /// A reflection manifest did not match the expected schema.
    #[error("failed to parse shader reflection manifest: {0}")]
    ReflectionParse(#[from] serde_json::Error),

    /// Initialization-time failure that isn't a raw Vulkan API error (e.g.
    /// malformed SPIR-V input).
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// A command buffer operation was attempted while not recording.
    #[error("command buffer is not recording")]
    NotRecording,

    /// A command buffer operation that requires an active render pass was
    /// attempted outside one.
    #[error("command buffer is not inside a render pass")]
    NotInRenderPass,

    /// A command buffer operation was attempted in a state that does not
    /// support it.
    #[error("command buffer is in the wrong state: {0}")]
    WrongState(String),

    /// The Vulkan validation layer reported an error-severity message during
    /// recording.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Passthrough of a raw `vk::Result` from an `ash` call.
    #[error("vulkan API error: {0}")]
    VulkanApi(#[from] ash::vk::Result),
}

/// Convenience alias used throughout the crate.
pub type VulkanResult<T> = Result<T, VulkanError>;
