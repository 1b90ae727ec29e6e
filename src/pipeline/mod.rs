//! Descriptor-set and pipeline-layout derivation, descriptor set writes,
//! and the content-hash-keyed pipeline cache.

pub mod cache;
pub mod descriptor_set;
pub mod layout;

pub use cache::{ComputePipeline, GraphicsPipeline, PipelineCache, RasterState, VertexLayoutDescription};
pub use descriptor_set::{DescriptorEntry, DescriptorSet};
pub use layout::{DescriptorSetLayout, MergedBinding, NamedPushConstantRange, PipelineLayout};
