//! The render graph: a declarative set of render nodes from which an
//! execution order, pooled attachment images, and framebuffers are
//! derived.

use ash::vk;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::device::Device;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::debug;
use crate::resource::{ComponentMapping, Image, ImageView, ResourcePool};

use super::{Framebuffer, RenderPass, SubpassDescription};

/// Extent/usage the caller supplies for a named attachment; defaults are
/// used for any attachment not present in this map.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentInfo {
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}

impl Default for AttachmentInfo {
    fn default() -> Self {
        Self {
            extent: vk::Extent3D { width: 1024, height: 1024, depth: 1 },
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            format: vk::Format::R8G8B8A8_UNORM,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

/// One node in the graph: an ordered list of subpasses plus any
/// non-subpass attachment reads (attachments this node samples but no
/// subpass inside it writes).
pub struct RenderNode {
    pub name: String,
    pub subpasses: Vec<SubpassDescription>,
    pub external_reads: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    extent: (u32, u32, u32),
    usage: u32,
    format: i32,
}

struct BuiltNode {
    render_pass: Arc<RenderPass>,
    framebuffer: Arc<Framebuffer>,
}

/// Kahn's-algorithm topological sort of `nodes` by attachment
/// producer/consumer edges. Pulled out of [`RenderGraph::topological_order`]
/// so it's testable without a device.
fn topological_order_of(nodes: &[RenderNode]) -> VulkanResult<Vec<usize>> {
    let n = nodes.len();
    let mut writers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        for name in RenderGraph::attachments_written_by(node) {
            writers.entry(name).or_default().push(i);
        }
    }

    let mut in_degree = vec![0usize; n];
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, node) in nodes.iter().enumerate() {
        for read in &node.external_reads {
            if let Some(producer_indices) = writers.get(read.as_str()) {
                for &p in producer_indices {
                    if p != i {
                        edges[p].push(i);
                        in_degree[i] += 1;
                    }
                }
            }
        }
    }

    let mut queue: std::collections::VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &edges[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != n {
        return Err(VulkanError::WrongState("render graph has a cycle".to_string()));
    }
    Ok(order)
}

/// Declarative render graph: owns materialised render passes,
/// framebuffers, and pooled attachment images across frames.
pub struct RenderGraph {
    device: Arc<Device>,
    nodes: Vec<RenderNode>,
    attachment_infos: HashMap<String, AttachmentInfo>,
    built: HashMap<String, BuiltNode>,
    image_pool: ResourcePool<PoolKey, Image>,
    dirty: bool,
}

impl RenderGraph {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            nodes: Vec::new(),
            attachment_infos: HashMap::new(),
            built: HashMap::new(),
            image_pool: ResourcePool::new(),
            dirty: true,
        }
    }

    /// Assigns (replacing if present) a render node by name.
    pub fn assign_render_node(&mut self, node: RenderNode) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == node.name) {
            *existing = node;
        } else {
            self.nodes.push(node);
        }
        self.dirty = true;
    }

    /// Removes a render node by name.
    pub fn delete_render_node(&mut self, name: &str) {
        self.nodes.retain(|n| n.name != name);
        self.built.remove(name);
        self.dirty = true;
    }

    /// Sets the external extent/usage/format for a named attachment.
    pub fn set_attachment_info(&mut self, name: &str, info: AttachmentInfo) {
        self.attachment_infos.insert(name.to_string(), info);
        self.dirty = true;
    }

    fn attachments_written_by(node: &RenderNode) -> HashSet<&str> {
        node.subpasses
            .iter()
            .flat_map(|s| s.iter())
            .filter(|(_, a)| {
                matches!(
                    a.ty,
                    super::AttachmentType::Color | super::AttachmentType::DepthStencil | super::AttachmentType::Resolve
                )
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Topologically sorts nodes so any node with a non-subpass dependency
    /// on an attachment comes after every node writing it. Returns an
    /// error if the dependency graph has a cycle.
    pub fn topological_order(&self) -> VulkanResult<Vec<usize>> {
        topological_order_of(&self.nodes)
    }

    fn attachment_info(&self, name: &str) -> AttachmentInfo {
        self.attachment_infos.get(name).copied().unwrap_or_default()
    }

    /// Rebuilds render passes, pooled attachment images, and framebuffers
    /// for every dirty node. No-op if the graph is not dirty.
    pub fn build(&mut self) -> VulkanResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let order = self.topological_order()?;

        for &index in &order {
            let node = &self.nodes[index];
            if self.built.contains_key(&node.name) {
                continue;
            }
            let render_pass = Arc::new(RenderPass::new(self.device.clone(), node.subpasses.clone())?);

            let mut views = Vec::new();
            for (name, _) in render_pass.attachment_order() {
                let info = self.attachment_info(name);
                let key = PoolKey {
                    extent: (info.extent.width, info.extent.height, info.extent.depth),
                    usage: info.usage.as_raw(),
                    format: info.format.as_raw(),
                };
                let device = self.device.clone();
                let image = self.image_pool.get_or_create(&key, || {
                    Image::new(
                        device,
                        info.extent,
                        info.format,
                        info.usage,
                        1,
                        1,
                        vk::SampleCountFlags::TYPE_1,
                        info.aspect,
                        vk::ImageCreateFlags::empty(),
                    )
                    .map(Arc::new)
                })?;
                let view = image.get_or_create_view(vk::ImageViewType::TYPE_2D, 0, 1, 0, 1, ComponentMapping::default())?;
                views.push(view);
            }

            let framebuffer = Arc::new(Framebuffer::new(self.device.clone(), render_pass.clone(), views)?);
            debug!("built render node '{}' ({} attachments)", node.name, render_pass.attachment_order().len());
            self.built.insert(node.name.clone(), BuiltNode { render_pass, framebuffer });
        }

        self.dirty = false;
        Ok(())
    }

    /// The materialised render pass for a node, if built.
    pub fn render_pass(&self, name: &str) -> Option<&Arc<RenderPass>> {
        self.built.get(name).map(|b| &b.render_pass)
    }

    /// The materialised framebuffer for a node, if built.
    pub fn framebuffer(&self, name: &str) -> Option<&Arc<Framebuffer>> {
        self.built.get(name).map(|b| &b.framebuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, writes: &[&str], reads: &[&str]) -> RenderNode {
        let mut subpass = SubpassDescription::new();
        for &w in writes {
            subpass.insert(
                w.to_string(),
                super::super::SubpassAttachment {
                    ty: super::super::AttachmentType::Color,
                    blend: super::super::blend_mode_state(super::super::BlendMode::Opaque),
                    description: vk::AttachmentDescription::default(),
                },
            );
        }
        RenderNode {
            name: name.to_string(),
            subpasses: vec![subpass],
            external_reads: reads.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn consumer_node_sorts_after_producer() {
        let nodes = vec![node("post", &[], &["scene_color"]), node("opaque_pass", &["scene_color"], &[])];
        let order = topological_order_of(&nodes).unwrap();
        let opaque_pos = order.iter().position(|&i| i == 1).unwrap();
        let post_pos = order.iter().position(|&i| i == 0).unwrap();
        assert!(opaque_pos < post_pos);
    }

    #[test]
    fn independent_nodes_both_appear() {
        let nodes = vec![node("a", &["x"], &[]), node("b", &["y"], &[])];
        let order = topological_order_of(&nodes).unwrap();
        assert_eq!(order.len(), 2);
    }
}
