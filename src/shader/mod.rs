//! SPIR-V shader loading, reflection, and specialization.

pub mod manifest;
pub mod reflection;
pub mod specialization;

pub use manifest::ShaderManifest;
pub use reflection::{AttributeType, DescriptorBinding, PushConstantMember, ShaderModule, StageVariable};
pub use specialization::Specialization;
