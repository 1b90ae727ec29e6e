//! Graphics/compute pipeline objects and the content-hash-keyed cache
//! that owns them.

use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::device::Device;
use crate::error::VulkanResult;
use crate::render_pass::RenderPass;
use crate::shader::Specialization;

use super::layout::PipelineLayout;

/// Description of one vertex buffer binding and its per-attribute layout,
/// derived from a shader's reflected stage inputs.
#[derive(Debug, Clone)]
pub struct VertexLayoutDescription {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayoutDescription {
    fn hash_into(&self, hasher: &mut DefaultHasher) {
        for b in &self.bindings {
            (b.binding, b.stride, b.input_rate.as_raw()).hash(hasher);
        }
        for a in &self.attributes {
            (a.location, a.binding, a.format.as_raw(), a.offset).hash(hasher);
        }
    }
}

/// Mutable render state a [`PipelineState`] carries between draws; every
/// field here participates in the pipeline cache key.
#[derive(Debug, Clone)]
pub struct RasterState {
    pub cull_mode: vk::CullModeFlags,
    pub polygon_mode: vk::PolygonMode,
    pub front_face: vk::FrontFace,
    pub sample_shading: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::BACK,
            polygon_mode: vk::PolygonMode::FILL,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            sample_shading: false,
        }
    }
}

/// A cached, ready-to-bind graphics pipeline.
pub struct GraphicsPipeline {
    device: Arc<Device>,
    handle: vk::Pipeline,
    layout: Arc<PipelineLayout>,
    hash: u64,
}

impl GraphicsPipeline {
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_pipeline(self.handle, None) };
    }
}

/// A cached, ready-to-bind compute pipeline.
pub struct ComputePipeline {
    device: Arc<Device>,
    handle: vk::Pipeline,
    layout: Arc<PipelineLayout>,
    workgroup_size: [u32; 3],
    hash: u64,
}

impl ComputePipeline {
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_pipeline(self.handle, None) };
    }
}

fn hash_stencil_op_state(h: &mut DefaultHasher, s: &vk::StencilOpState) {
    s.fail_op.as_raw().hash(h);
    s.pass_op.as_raw().hash(h);
    s.depth_fail_op.as_raw().hash(h);
    s.compare_op.as_raw().hash(h);
    s.compare_mask.hash(h);
    s.write_mask.hash(h);
    s.reference.hash(h);
}

fn hash_depth_stencil(h: &mut DefaultHasher, ds: &vk::PipelineDepthStencilStateCreateInfo) {
    ds.depth_test_enable.hash(h);
    ds.depth_write_enable.hash(h);
    ds.depth_compare_op.as_raw().hash(h);
    ds.depth_bounds_test_enable.hash(h);
    ds.stencil_test_enable.hash(h);
    hash_stencil_op_state(h, &ds.front);
    hash_stencil_op_state(h, &ds.back);
    ds.min_depth_bounds.to_bits().hash(h);
    ds.max_depth_bounds.to_bits().hash(h);
}

fn hash_blend_state(h: &mut DefaultHasher, s: &vk::PipelineColorBlendAttachmentState) {
    s.blend_enable.hash(h);
    s.src_color_blend_factor.as_raw().hash(h);
    s.dst_color_blend_factor.as_raw().hash(h);
    s.color_blend_op.as_raw().hash(h);
    s.src_alpha_blend_factor.as_raw().hash(h);
    s.dst_alpha_blend_factor.as_raw().hash(h);
    s.alpha_blend_op.as_raw().hash(h);
    s.color_write_mask.as_raw().hash(h);
}

/// Hashes `(name, sampler handle)` pairs in name-sorted order so the same
/// set of immutable samplers always yields the same key regardless of
/// `HashMap` iteration order.
fn hash_immutable_samplers(h: &mut DefaultHasher, samplers: &HashMap<String, Arc<crate::resource::Sampler>>) {
    let mut entries: Vec<(&str, vk::Sampler)> = samplers.iter().map(|(name, s)| (name.as_str(), s.handle())).collect();
    entries.sort_by_key(|(name, _)| *name);
    for (name, handle) in entries {
        name.hash(h);
        handle.hash(h);
    }
}

/// Resolves a stage's specialization constants into the `(map entries,
/// byte data)` pair a `vk::SpecializationInfo` borrows from.
fn build_specialization_data(stage: &Specialization) -> (Vec<vk::SpecializationMapEntry>, Vec<u8>) {
    let resolved = stage.resolved_entries();
    let mut map_entries = Vec::with_capacity(resolved.len());
    let mut data = Vec::with_capacity(resolved.len() * 4);
    for (id, value) in resolved {
        map_entries.push(vk::SpecializationMapEntry {
            constant_id: id,
            offset: data.len() as u32,
            size: 4,
        });
        data.extend_from_slice(&value.to_ne_bytes());
    }
    (map_entries, data)
}

fn specialization_info_from<'a>(map_entries: &'a [vk::SpecializationMapEntry], data: &'a [u8]) -> vk::SpecializationInfo<'a> {
    vk::SpecializationInfo::default().map_entries(map_entries).data(data)
}

/// Owns the set of graphics/compute pipelines created so far, keyed by a
/// content hash of the state that affects pipeline creation.
pub struct PipelineCache {
    graphics: Mutex<HashMap<u64, Arc<GraphicsPipeline>>>,
    compute: Mutex<HashMap<u64, Arc<ComputePipeline>>>,
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self {
            graphics: Mutex::new(HashMap::new()),
            compute: Mutex::new(HashMap::new()),
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the graphics-pipeline cache key and returns the cached
    /// pipeline, creating it on miss.
    pub fn get_or_create_graphics(
        &self,
        device: &Arc<Device>,
        render_pass: &RenderPass,
        subpass_index: u32,
        vertex_layout: &VertexLayoutDescription,
        topology: vk::PrimitiveTopology,
        raster: &RasterState,
        depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
        blend_states: &[vk::PipelineColorBlendAttachmentState],
        dynamic_states: &[vk::DynamicState],
        stages: &[Specialization],
        immutable_samplers: &HashMap<String, Arc<crate::resource::Sampler>>,
    ) -> VulkanResult<Arc<GraphicsPipeline>> {
        let mut hasher = DefaultHasher::new();
        render_pass.hash().hash(&mut hasher);
        subpass_index.hash(&mut hasher);
        vertex_layout.hash_into(&mut hasher);
        (topology.as_raw()).hash(&mut hasher);
        raster.cull_mode.as_raw().hash(&mut hasher);
        raster.polygon_mode.as_raw().hash(&mut hasher);
        raster.front_face.as_raw().hash(&mut hasher);
        raster.sample_shading.hash(&mut hasher);
        hash_depth_stencil(&mut hasher, &depth_stencil);
        for state in blend_states {
            hash_blend_state(&mut hasher, state);
        }
        for state in dynamic_states {
            state.as_raw().hash(&mut hasher);
        }
        for stage in stages {
            stage.content_hash().hash(&mut hasher);
        }
        hash_immutable_samplers(&mut hasher, immutable_samplers);
        let key = hasher.finish();

        if let Some(pipeline) = self.graphics.lock().get(&key) {
            return Ok(pipeline.clone());
        }

        let layout = Arc::new(PipelineLayout::build(device.clone(), stages, immutable_samplers)?);

        let spec_data: Vec<(Vec<vk::SpecializationMapEntry>, Vec<u8>)> =
            stages.iter().map(build_specialization_data).collect();
        let spec_infos: Vec<vk::SpecializationInfo> = spec_data
            .iter()
            .map(|(entries, data)| specialization_info_from(entries, data))
            .collect();

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages
            .iter()
            .zip(spec_infos.iter())
            .map(|(stage, spec)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.module().stage())
                    .module(stage.module().handle())
                    .name(c"main")
                    .specialization_info(spec)
            })
            .collect();

        let vertex_input_bindings = vertex_layout.bindings.clone();
        let vertex_input_attributes = vertex_layout.attributes.clone();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_input_bindings)
            .vertex_attribute_descriptions(&vertex_input_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(raster.polygon_mode)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .line_width(1.0);

        let mut samples = vk::SampleCountFlags::TYPE_1;
        if let Some(subpass) = render_pass.subpasses().get(subpass_index as usize) {
            for (_, attachment) in subpass {
                if matches!(
                    attachment.ty,
                    crate::render_pass::AttachmentType::Color | crate::render_pass::AttachmentType::DepthStencil
                ) {
                    samples = attachment.description.samples;
                    break;
                }
            }
        }
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(samples)
            .sample_shading_enable(raster.sample_shading);

        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op(vk::LogicOp::COPY)
            .attachments(blend_states);
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(subpass_index);

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(device.pipeline_cache(), &[create_info], None)
        }
        .map_err(|(_, e)| e)?;

        let pipeline = Arc::new(GraphicsPipeline {
            device: device.clone(),
            handle: pipelines[0],
            layout,
            hash: key,
        });
        self.graphics.lock().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Computes the compute-pipeline cache key (module identity +
    /// resolved specialization + immutable samplers) and returns the
    /// cached pipeline, creating it on miss.
    pub fn get_or_create_compute(
        &self,
        device: &Arc<Device>,
        stage: &Specialization,
        immutable_samplers: &HashMap<String, Arc<crate::resource::Sampler>>,
    ) -> VulkanResult<Arc<ComputePipeline>> {
        let mut hasher = DefaultHasher::new();
        stage.content_hash().hash(&mut hasher);
        hash_immutable_samplers(&mut hasher, immutable_samplers);
        let key = hasher.finish();
        if let Some(pipeline) = self.compute.lock().get(&key) {
            return Ok(pipeline.clone());
        }

        let layout = Arc::new(PipelineLayout::build(device.clone(), std::slice::from_ref(stage), immutable_samplers)?);

        let (map_entries, data) = build_specialization_data(stage);
        let spec_info = specialization_info_from(&map_entries, &data);
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(stage.module().handle())
            .name(c"main")
            .specialization_info(&spec_info);

        let create_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(layout.handle());
        let pipelines = unsafe {
            device
                .raw()
                .create_compute_pipelines(device.pipeline_cache(), &[create_info], None)
        }
        .map_err(|(_, e)| e)?;

        let workgroup_size = stage.module().workgroup_size().unwrap_or([1, 1, 1]);
        let pipeline = Arc::new(ComputePipeline {
            device: device.clone(),
            handle: pipelines[0],
            layout,
            workgroup_size,
            hash: key,
        });
        self.compute.lock().insert(key, pipeline.clone());
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_hash_is_stable_for_same_input() {
        let layout = VertexLayoutDescription {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: 12,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            }],
        };
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        layout.hash_into(&mut h1);
        layout.hash_into(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn default_raster_state_culls_back_faces_ccw() {
        let raster = RasterState::default();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
    }
}
