//! SPIR-V module loading and reflection-manifest-driven introspection.

use ash::vk;
use std::sync::Arc;

use crate::device::Device;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::trace;

use super::manifest::{type_size, ArrayDim, ShaderManifest};

/// Classification of a vertex stage input/output by semantic name,
/// following a case-insensitive `<name><index>` split (e.g. `TEXCOORD1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Position,
    Normal,
    Tangent,
    Binormal,
    Color,
    Texcoord,
    PointSize,
    BlendIndex,
    BlendWeight,
}

/// One stage input or output variable.
#[derive(Debug, Clone)]
pub struct StageVariable {
    pub name: String,
    pub location: u32,
    pub format: String,
    pub attribute: Option<(AttributeType, u32)>,
}

/// Splits a semantic name into a known [`AttributeType`] and trailing
/// index, e.g. `"TEXCOORD1"` -> `(Texcoord, 1)`. Names that don't match a
/// known prefix return `None`; the variable is still kept by name.
pub fn classify_semantic(name: &str) -> Option<(AttributeType, u32)> {
    let lower = name.to_ascii_lowercase();
    let split_at = lower.find(|c: char| c.is_ascii_digit()).unwrap_or(lower.len());
    let (base, digits) = lower.split_at(split_at);
    let index: u32 = digits.parse().unwrap_or(0);
    let attribute = match base {
        "position" | "pos" => AttributeType::Position,
        "normal" => AttributeType::Normal,
        "tangent" => AttributeType::Tangent,
        "binormal" | "bitangent" => AttributeType::Binormal,
        "color" => AttributeType::Color,
        "texcoord" | "uv" => AttributeType::Texcoord,
        "psize" | "pointsize" => AttributeType::PointSize,
        "blendindices" | "blendindex" => AttributeType::BlendIndex,
        "blendweight" => AttributeType::BlendWeight,
        _ => return None,
    };
    Some((attribute, index))
}

/// One descriptor binding reflected from a shader stage.
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub input_attachment_index: Option<u32>,
}

/// One push-constant member, with its byte range resolved from the
/// manifest's type table.
#[derive(Debug, Clone)]
pub struct PushConstantMember {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// One specialization constant declared by a shader module.
#[derive(Debug, Clone)]
pub struct SpecializationConstant {
    pub id: u32,
    pub name: String,
    pub default_value: serde_json::Value,
}

/// A loaded SPIR-V module plus its reflected descriptor/push-constant/
/// stage-IO/specialization-constant tables.
pub struct ShaderModule {
    device: Arc<Device>,
    handle: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: String,
    descriptor_bindings: Vec<DescriptorBinding>,
    push_constants: Vec<PushConstantMember>,
    inputs: Vec<StageVariable>,
    outputs: Vec<StageVariable>,
    specialization_constants: Vec<SpecializationConstant>,
    workgroup_size: Option<[u32; 3]>,
}

fn stage_from_mode(mode: &str) -> vk::ShaderStageFlags {
    match mode {
        "vertex" => vk::ShaderStageFlags::VERTEX,
        "fragment" => vk::ShaderStageFlags::FRAGMENT,
        "compute" => vk::ShaderStageFlags::COMPUTE,
        "geometry" => vk::ShaderStageFlags::GEOMETRY,
        "tess_control" => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        "tess_evaluation" => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        _ => vk::ShaderStageFlags::empty(),
    }
}

fn descriptor_count(array: &[ArrayDim], specialization: &std::collections::HashMap<String, u32>) -> u32 {
    array
        .iter()
        .map(|dim| match dim {
            ArrayDim::Literal(n) => *n,
            ArrayDim::Named(name) => specialization.get(name).copied().unwrap_or(1),
        })
        .product::<u32>()
        .max(1)
}

impl ShaderModule {
    /// Loads a SPIR-V binary and its reflection manifest, building the
    /// descriptor/push-constant/stage-IO tables. `spirv_bytes` must be
    /// 4-byte aligned.
    pub fn from_bytes(device: Arc<Device>, spirv_bytes: &[u8], manifest_json: &str) -> VulkanResult<Self> {
        let (prefix, words, suffix) = unsafe { spirv_bytes.align_to::<u32>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "SPIR-V bytes are not 4-byte aligned".to_string(),
            ));
        }
        let manifest = ShaderManifest::parse(manifest_json)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(words);
        let handle = unsafe { device.raw().create_shader_module(&create_info, None) }?;

        let entry = manifest.entry_points.first().cloned().unwrap_or(super::manifest::EntryPointManifest {
            name: "main".to_string(),
            mode: "vertex".to_string(),
            workgroup_size: None,
        });
        let stage = stage_from_mode(&entry.mode);

        let mut spec_consts_by_name = std::collections::HashMap::new();
        let specialization_constants = manifest
            .specialization_constants
            .iter()
            .map(|c| {
                let value = c.default_value.as_u64().unwrap_or(1) as u32;
                spec_consts_by_name.insert(c.name.clone(), value);
                SpecializationConstant {
                    id: c.id,
                    name: c.name.clone(),
                    default_value: c.default_value.clone(),
                }
            })
            .collect();

        let descriptor_sources: [(&[super::manifest::DescriptorManifest], vk::DescriptorType); 7] = [
            (&manifest.ubos, vk::DescriptorType::UNIFORM_BUFFER),
            (&manifest.ssbos, vk::DescriptorType::STORAGE_BUFFER),
            (&manifest.textures, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            (&manifest.images, vk::DescriptorType::STORAGE_IMAGE),
            (&manifest.separate_images, vk::DescriptorType::SAMPLED_IMAGE),
            (&manifest.separate_samplers, vk::DescriptorType::SAMPLER),
            (&manifest.subpass_inputs, vk::DescriptorType::INPUT_ATTACHMENT),
        ];
        let mut descriptor_bindings = Vec::new();
        for (entries, ty) in descriptor_sources {
            for d in entries {
                descriptor_bindings.push(DescriptorBinding {
                    name: d.name.clone(),
                    set: d.set,
                    binding: d.binding,
                    descriptor_type: ty,
                    descriptor_count: descriptor_count(&d.array, &spec_consts_by_name),
                    input_attachment_index: d.input_attachment_index,
                });
            }
        }
        for d in &manifest.acceleration_structures {
            descriptor_bindings.push(DescriptorBinding {
                name: d.name.clone(),
                set: d.set,
                binding: d.binding,
                descriptor_type: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: descriptor_count(&d.array, &spec_consts_by_name),
                input_attachment_index: None,
            });
        }

        let push_constants = manifest
            .push_constants
            .iter()
            .map(|m| PushConstantMember {
                name: m.name.clone(),
                offset: m.offset,
                size: type_size(&m.ty, &manifest.types).unwrap_or(0),
            })
            .collect();

        let to_stage_var = |v: &super::manifest::StageVariableManifest| StageVariable {
            name: v.name.clone(),
            location: v.location,
            format: v.ty.clone(),
            attribute: classify_semantic(&v.name),
        };
        let inputs = manifest.inputs.iter().map(to_stage_var).collect();
        let outputs = manifest.outputs.iter().map(to_stage_var).collect();

        trace!("loaded shader module '{}' ({:?})", entry.name, stage);
        Ok(Self {
            device,
            handle,
            stage,
            entry_point: entry.name,
            descriptor_bindings,
            push_constants,
            inputs,
            outputs,
            specialization_constants,
            workgroup_size: entry.workgroup_size,
        })
    }

    /// Loads a module from a `.spv`/`.json` file pair sharing a stem.
    pub fn from_file(device: Arc<Device>, spirv_path: &std::path::Path) -> VulkanResult<Self> {
        let bytes = std::fs::read(spirv_path)?;
        let manifest_path = spirv_path.with_extension("json");
        let manifest_json = std::fs::read_to_string(manifest_path)?;
        Self::from_bytes(device, &bytes, &manifest_json)
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
    pub fn descriptor_bindings(&self) -> &[DescriptorBinding] {
        &self.descriptor_bindings
    }
    pub fn push_constants(&self) -> &[PushConstantMember] {
        &self.push_constants
    }
    pub fn inputs(&self) -> &[StageVariable] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[StageVariable] {
        &self.outputs
    }
    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.specialization_constants
    }
    pub fn workgroup_size(&self) -> Option<[u32; 3]> {
        self.workgroup_size
    }

    /// Looks up a descriptor binding by name.
    pub fn binding(&self, name: &str) -> Option<&DescriptorBinding> {
        self.descriptor_bindings.iter().find(|b| b.name == name)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_shader_module(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_semantics_with_index() {
        assert_eq!(classify_semantic("TEXCOORD1"), Some((AttributeType::Texcoord, 1)));
        assert_eq!(classify_semantic("Normal"), Some((AttributeType::Normal, 0)));
        assert_eq!(classify_semantic("COLOR2"), Some((AttributeType::Color, 2)));
    }

    #[test]
    fn unknown_semantic_returns_none() {
        assert_eq!(classify_semantic("CustomThing"), None);
    }

    #[test]
    fn descriptor_count_resolves_named_dimension() {
        let mut specialization = std::collections::HashMap::new();
        specialization.insert("NUM_LIGHTS".to_string(), 4);
        let array = vec![ArrayDim::Named("NUM_LIGHTS".to_string())];
        assert_eq!(descriptor_count(&array, &specialization), 4);
    }

    #[test]
    fn descriptor_count_defaults_to_one_for_empty_array() {
        assert_eq!(descriptor_count(&[], &std::collections::HashMap::new()), 1);
    }
}
