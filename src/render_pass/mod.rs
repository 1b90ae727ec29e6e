//! Render passes built from ordered, named-attachment subpass
//! descriptions, with automatically derived attachment flattening and
//! subpass dependencies.

pub mod framebuffer;
pub mod graph;

use ash::vk;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::device::Device;
use crate::error::VulkanResult;

pub use framebuffer::Framebuffer;

/// Name identifying an attachment across subpasses of a render pass.
pub type AttachmentId = String;

/// Blend preset, mirroring the common fixed-function blend modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Add,
    Subtract,
    Alpha,
}

/// Produces the `vk::PipelineColorBlendAttachmentState` for a [`BlendMode`].
pub fn blend_mode_state(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let all_components = vk::ColorComponentFlags::R
        | vk::ColorComponentFlags::G
        | vk::ColorComponentFlags::B
        | vk::ColorComponentFlags::A;
    match mode {
        BlendMode::Opaque => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(all_components),
        BlendMode::Add => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(all_components),
        BlendMode::Subtract => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::SUBTRACT)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::SUBTRACT)
            .color_write_mask(all_components),
        BlendMode::Alpha => vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(all_components),
    }
}

/// The role an attachment plays within one subpass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentType {
    Input,
    Color,
    Resolve,
    DepthStencil,
    Preserve,
}

/// `(stage, access)` an attachment's dependency participates with,
/// derived from its *role* in the subpass rather than its layout: two
/// attachments sharing a layout can still read or write it for entirely
/// different reasons (an input attachment and a sampled texture can both
/// sit at `SHADER_READ_ONLY_OPTIMAL`), so only the role disambiguates
/// which access mask actually applies.
fn role_stage_access(ty: AttachmentType) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match ty {
        AttachmentType::Color | AttachmentType::Resolve => {
            (vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        }
        AttachmentType::DepthStencil => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        AttachmentType::Input => {
            (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ)
        }
        AttachmentType::Preserve => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
    }
}

/// One attachment's contribution to one subpass: its role, blend state
/// (meaningful only for `Color`), and Vulkan attachment description.
#[derive(Debug, Clone)]
pub struct SubpassAttachment {
    pub ty: AttachmentType,
    pub blend: vk::PipelineColorBlendAttachmentState,
    pub description: vk::AttachmentDescription,
}

/// One subpass: a named-attachment map.
pub type SubpassDescription = HashMap<AttachmentId, SubpassAttachment>;

/// Flattens an ordered list of subpasses into the render pass's attachment
/// list: each name's first occurrence fixes its position and initial
/// state, later occurrences only update `final_layout`/`store_op`/
/// `stencil_store_op`. Pulled out of [`RenderPass::new`] so it's testable
/// without a device.
fn flatten_attachments(
    subpasses: &[SubpassDescription],
) -> (Vec<(AttachmentId, vk::AttachmentDescription)>, HashMap<AttachmentId, u32>) {
    let mut attachment_order: Vec<(AttachmentId, vk::AttachmentDescription)> = Vec::new();
    let mut attachment_index: HashMap<AttachmentId, u32> = HashMap::new();

    for subpass in subpasses {
        let mut names: Vec<&AttachmentId> = subpass.keys().collect();
        names.sort();
        for name in names {
            let desc = subpass[name].description;
            if let Some(&existing) = attachment_index.get(name) {
                let (_, stored) = &mut attachment_order[existing as usize];
                stored.final_layout = desc.final_layout;
                stored.store_op = desc.store_op;
                stored.stencil_store_op = desc.stencil_store_op;
            } else {
                let index = attachment_order.len() as u32;
                attachment_index.insert(name.clone(), index);
                attachment_order.push((name.clone(), desc));
            }
        }
    }

    (attachment_order, attachment_index)
}

fn hash_attachment_description(h: &mut DefaultHasher, desc: &vk::AttachmentDescription) {
    (desc.format.as_raw() as i64).hash(h);
    (desc.samples.as_raw() as i64).hash(h);
    (desc.load_op.as_raw() as i64).hash(h);
    (desc.store_op.as_raw() as i64).hash(h);
    (desc.stencil_load_op.as_raw() as i64).hash(h);
    (desc.stencil_store_op.as_raw() as i64).hash(h);
    (desc.initial_layout.as_raw() as i64).hash(h);
    (desc.final_layout.as_raw() as i64).hash(h);
}

/// A render pass built from ordered, named-attachment subpass
/// descriptions.
pub struct RenderPass {
    device: Arc<Device>,
    handle: vk::RenderPass,
    subpasses: Vec<SubpassDescription>,
    attachment_order: Vec<(AttachmentId, vk::AttachmentDescription)>,
    attachment_index: HashMap<AttachmentId, u32>,
    hash: u64,
}

impl RenderPass {
    /// Builds a render pass from an ordered list of subpass descriptions.
    /// See [`crate::render_pass`] module docs for the flattening and
    /// dependency-derivation algorithm.
    pub fn new(device: Arc<Device>, subpasses_in: Vec<SubpassDescription>) -> VulkanResult<Self> {
        let (attachment_order, attachment_index) = flatten_attachments(&subpasses_in);
        let mut hasher = DefaultHasher::new();

        struct PerSubpass {
            input: Vec<vk::AttachmentReference>,
            color: Vec<vk::AttachmentReference>,
            resolve: Vec<vk::AttachmentReference>,
            preserve: Vec<u32>,
            depth: Option<vk::AttachmentReference>,
        }
        let mut per_subpass: Vec<PerSubpass> = Vec::with_capacity(subpasses_in.len());
        let mut dependencies: Vec<vk::SubpassDependency> = Vec::new();

        for (i, subpass) in subpasses_in.iter().enumerate() {
            let mut entry = PerSubpass {
                input: Vec::new(),
                color: Vec::new(),
                resolve: Vec::new(),
                preserve: Vec::new(),
                depth: None,
            };

            let mut names: Vec<&AttachmentId> = subpass.keys().collect();
            names.sort();
            for name in names {
                let attachment = &subpass[name];
                let desc = attachment.description;
                let index = attachment_index[name];

                let reference = vk::AttachmentReference {
                    attachment: index,
                    layout: desc.initial_layout,
                };
                match attachment.ty {
                    AttachmentType::Color => entry.color.push(reference),
                    AttachmentType::DepthStencil => entry.depth = Some(reference),
                    AttachmentType::Resolve => entry.resolve.push(reference),
                    AttachmentType::Input => entry.input.push(reference),
                    AttachmentType::Preserve => entry.preserve.push(index),
                }

                let mut by_src: HashMap<usize, vk::SubpassDependency> = HashMap::new();
                for src in (0..i).rev() {
                    if let Some(src_attachment) = subpasses_in[src].get(name) {
                        if matches!(
                            src_attachment.ty,
                            AttachmentType::Color | AttachmentType::DepthStencil | AttachmentType::Resolve
                        ) {
                            let (src_stage, src_access) = role_stage_access(src_attachment.ty);
                            let (dst_stage, dst_access) = role_stage_access(attachment.ty);
                            let dep = by_src.entry(src).or_insert_with(|| vk::SubpassDependency {
                                src_subpass: src as u32,
                                dst_subpass: i as u32,
                                src_stage_mask: vk::PipelineStageFlags::empty(),
                                dst_stage_mask: vk::PipelineStageFlags::empty(),
                                src_access_mask: vk::AccessFlags::empty(),
                                dst_access_mask: vk::AccessFlags::empty(),
                                dependency_flags: vk::DependencyFlags::BY_REGION,
                            });
                            dep.src_stage_mask |= src_stage;
                            dep.src_access_mask |= src_access;
                            dep.dst_stage_mask |= dst_stage;
                            dep.dst_access_mask |= dst_access;
                        }
                    }
                }
                dependencies.extend(by_src.into_values());
            }

            per_subpass.push(entry);
        }

        for subpass in &subpasses_in {
            let mut names: Vec<&AttachmentId> = subpass.keys().collect();
            names.sort();
            names.hash(&mut hasher);
            for name in names {
                name.hash(&mut hasher);
                let attachment = &subpass[name];
                (attachment.ty as u8).hash(&mut hasher);
                hash_attachment_description(&mut hasher, &attachment.description);
            }
        }

        let vk_subpasses: Vec<vk::SubpassDescription> = per_subpass
            .iter()
            .map(|s| {
                let mut desc = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .input_attachments(&s.input)
                    .color_attachments(&s.color)
                    .preserve_attachments(&s.preserve);
                if !s.resolve.is_empty() {
                    desc = desc.resolve_attachments(&s.resolve);
                }
                if let Some(depth) = &s.depth {
                    desc = desc.depth_stencil_attachment(depth);
                }
                desc
            })
            .collect();

        let attachments: Vec<vk::AttachmentDescription> = attachment_order.iter().map(|(_, d)| *d).collect();
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&vk_subpasses)
            .dependencies(&dependencies);
        let handle = unsafe { device.raw().create_render_pass(&create_info, None) }?;

        Ok(Self {
            device,
            handle,
            subpasses: subpasses_in,
            attachment_order,
            attachment_index,
            hash: hasher.finish(),
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
    pub fn subpasses(&self) -> &[SubpassDescription] {
        &self.subpasses
    }
    pub fn attachment_order(&self) -> &[(AttachmentId, vk::AttachmentDescription)] {
        &self.attachment_order
    }
    pub fn attachment_index(&self, id: &str) -> Option<u32> {
        self.attachment_index.get(id).copied()
    }
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_render_pass(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_attachment(final_layout: vk::ImageLayout) -> SubpassAttachment {
        SubpassAttachment {
            ty: AttachmentType::Color,
            blend: blend_mode_state(BlendMode::Opaque),
            description: vk::AttachmentDescription {
                format: vk::Format::R8G8B8A8_UNORM,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                final_layout,
                ..Default::default()
            },
        }
    }

    #[test]
    fn blend_mode_opaque_disables_blending() {
        let state = blend_mode_state(BlendMode::Opaque);
        assert_eq!(state.blend_enable, 0);
    }

    #[test]
    fn blend_mode_alpha_uses_src_alpha_factor() {
        let state = blend_mode_state(BlendMode::Alpha);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
    }

    #[test]
    fn later_subpass_occurrence_updates_final_layout_only() {
        let mut first = SubpassDescription::new();
        first.insert("color".to_string(), color_attachment(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
        let mut second = SubpassDescription::new();
        second.insert("color".to_string(), color_attachment(vk::ImageLayout::PRESENT_SRC_KHR));

        let (attachment_order, attachment_index) = flatten_attachments(&[first, second]);
        assert_eq!(attachment_index["color"], 0);
        assert_eq!(attachment_order.len(), 1);
        assert_eq!(attachment_order[0].1.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(attachment_order[0].1.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
