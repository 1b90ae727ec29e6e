//! Descriptor-set-layout and pipeline-layout derivation from merged shader
//! reflection across every stage of a pipeline.

use ash::vk;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::device::Device;
use crate::error::{VulkanError, VulkanResult};
use crate::resource::Sampler;
use crate::shader::Specialization;

/// One merged binding slot within a descriptor set.
#[derive(Debug, Clone)]
pub struct MergedBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    pub binding_flags: vk::DescriptorBindingFlags,
    pub immutable_samplers: Vec<vk::Sampler>,
}

/// A descriptor set layout built from the union of bindings declared by
/// every stage that references set `set_index`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    handle: vk::DescriptorSetLayout,
    set_index: u32,
    bindings: Vec<MergedBinding>,
}

impl DescriptorSetLayout {
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }
    pub fn set_index(&self) -> u32 {
        self.set_index
    }
    pub fn bindings(&self) -> &[MergedBinding] {
        &self.bindings
    }
    pub fn binding(&self, binding: u32) -> Option<&MergedBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_descriptor_set_layout(self.handle, None) };
    }
}

/// A merged push-constant range, named for lookup by [`crate::command`]
/// push helpers.
#[derive(Debug, Clone)]
pub struct NamedPushConstantRange {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// The merged pipeline layout across every stage passed to
/// [`PipelineLayout::build`].
pub struct PipelineLayout {
    device: Arc<Device>,
    handle: vk::PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
    push_constants: Vec<NamedPushConstantRange>,
}

impl PipelineLayout {
    /// Merges descriptor bindings and push constants across `stages`,
    /// applying `immutable_samplers` (by binding name) before layout
    /// creation, and creates the Vulkan layout objects.
    pub fn build(
        device: Arc<Device>,
        stages: &[Specialization],
        immutable_samplers: &HashMap<String, Arc<Sampler>>,
    ) -> VulkanResult<Self> {
        // set_index -> binding_index -> accumulated state
        let mut sets: BTreeMap<u32, BTreeMap<u32, MergedBinding>> = BTreeMap::new();

        for stage in stages {
            let stage_flags = stage.module().stage();
            for b in stage.module().descriptor_bindings() {
                let entry = sets.entry(b.set).or_default().entry(b.binding).or_insert_with(|| MergedBinding {
                    binding: b.binding,
                    descriptor_type: b.descriptor_type,
                    descriptor_count: b.descriptor_count,
                    stage_flags: vk::ShaderStageFlags::empty(),
                    binding_flags: vk::DescriptorBindingFlags::empty(),
                    immutable_samplers: Vec::new(),
                });
                if entry.descriptor_type != b.descriptor_type || entry.descriptor_count != b.descriptor_count {
                    return Err(VulkanError::LayoutMismatch(format!(
                        "binding {} in set {} disagrees on type/count across stages",
                        b.binding, b.set
                    )));
                }
                entry.stage_flags |= stage_flags;
                entry.binding_flags |= stage.binding_flags(&b.name);
                if let Some(sampler) = immutable_samplers.get(&b.name) {
                    if entry.immutable_samplers.is_empty() {
                        entry.immutable_samplers = (0..entry.descriptor_count).map(|_| sampler.handle()).collect();
                    }
                }
            }
        }

        // name -> accumulated push constant range
        let mut push_constants_by_name: BTreeMap<String, NamedPushConstantRange> = BTreeMap::new();
        for stage in stages {
            let stage_flags = stage.module().stage();
            for pc in stage.module().push_constants() {
                let entry = push_constants_by_name
                    .entry(pc.name.clone())
                    .or_insert_with(|| NamedPushConstantRange {
                        name: pc.name.clone(),
                        offset: pc.offset,
                        size: pc.size,
                        stage_flags: vk::ShaderStageFlags::empty(),
                    });
                if entry.offset != pc.offset || entry.size != pc.size {
                    return Err(VulkanError::LayoutMismatch(format!(
                        "push constant '{}' disagrees on offset/size across stages",
                        pc.name
                    )));
                }
                entry.stage_flags |= stage_flags;
            }
        }

        let mut set_layouts = Vec::new();
        for (set_index, bindings) in sets {
            let merged: Vec<MergedBinding> = bindings.into_values().collect();
            let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = merged
                .iter()
                .map(|b| {
                    let mut binding = vk::DescriptorSetLayoutBinding::default()
                        .binding(b.binding)
                        .descriptor_type(b.descriptor_type)
                        .descriptor_count(b.descriptor_count)
                        .stage_flags(b.stage_flags);
                    if !b.immutable_samplers.is_empty() {
                        binding = binding.immutable_samplers(&b.immutable_samplers);
                    }
                    binding
                })
                .collect();
            let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
            let handle = unsafe { device.raw().create_descriptor_set_layout(&create_info, None) }?;
            set_layouts.push(DescriptorSetLayout {
                device: device.clone(),
                handle,
                set_index,
                bindings: merged,
            });
        }

        let push_constants: Vec<NamedPushConstantRange> = push_constants_by_name.into_values().collect();
        let vk_ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|pc| vk::PushConstantRange {
                stage_flags: pc.stage_flags,
                offset: pc.offset,
                size: pc.size,
            })
            .collect();
        let set_layout_handles: Vec<vk::DescriptorSetLayout> = set_layouts.iter().map(|l| l.handle).collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layout_handles)
            .push_constant_ranges(&vk_ranges);
        let handle = unsafe { device.raw().create_pipeline_layout(&layout_info, None) }?;

        Ok(Self {
            device,
            handle,
            set_layouts,
            push_constants,
        })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }
    pub fn set_layouts(&self) -> &[DescriptorSetLayout] {
        &self.set_layouts
    }
    pub fn push_constants(&self) -> &[NamedPushConstantRange] {
        &self.push_constants
    }
    pub fn push_constant(&self, name: &str) -> Option<&NamedPushConstantRange> {
        self.push_constants.iter().find(|pc| pc.name == name)
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_pipeline_layout(self.handle, None) };
    }
}
