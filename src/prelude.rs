//! Common re-exports for consumers of this crate.

pub use crate::command::{self, CommandBuffer};
pub use crate::config::{CliArgs, CoreConfig};
pub use crate::device::instance::Instance;
pub use crate::device::memory::{MemoryAllocator, SubAllocation};
pub use crate::device::Device;
pub use crate::error::{VulkanError, VulkanResult};
pub use crate::pipeline::{
    ComputePipeline, DescriptorEntry, DescriptorSet, DescriptorSetLayout, GraphicsPipeline, PipelineCache,
    PipelineLayout, RasterState, VertexLayoutDescription,
};
pub use crate::render_pass::{
    blend_mode_state, graph::AttachmentInfo, graph::RenderGraph, graph::RenderNode, AttachmentType, BlendMode,
    Framebuffer, RenderPass, SubpassDescription,
};
pub use crate::resource::{
    Buffer, BufferView, ComponentMapping, Image, ImageView, ResourcePool, Sampler, Subresource, TexelViewKey,
    TrackedState,
};
pub use crate::shader::{ShaderManifest, ShaderModule, Specialization};
