//! Descriptor sets: a bound-entry map with batched, deferred writes.

use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::Device;
use crate::error::{VulkanError, VulkanResult};
use crate::resource::{Buffer, BufferView, Image, ImageView, Sampler};

use super::layout::DescriptorSetLayout;

/// One bound descriptor value. A tagged union matching every descriptor
/// type this crate supports.
#[derive(Clone)]
pub enum DescriptorEntry {
    /// A uniform or storage buffer range.
    BufferRange { buffer: Arc<Buffer>, offset: vk::DeviceSize, range: vk::DeviceSize },
    /// A uniform or storage texel buffer view.
    TexelView { view: BufferView<u8>, format: vk::Format },
    /// A sampled/storage/combined/input-attachment image.
    Image {
        view: ImageView,
        sampler: Option<Arc<Sampler>>,
        layout: vk::ImageLayout,
    },
    /// Raw bytes written into an inline uniform block.
    InlineBytes(Vec<u8>),
    /// An acceleration structure handle (ray tracing).
    AccelerationStructure(vk::AccelerationStructureKHR),
}

/// Key for one array element of one binding.
type EntryKey = (u32, u32);

/// Which backing vector (and index into it) a pending write's payload
/// lives in.
#[derive(Clone, Copy)]
enum WriteKind {
    Buffer(usize),
    Image(usize),
    Texel(usize),
    Inline(usize),
    Accel(usize),
}

/// Pushes `key` onto `pending` unless it's already queued. Pulled out of
/// [`DescriptorSet::insert`] so it's testable without a device.
fn mark_pending(pending: &mut Vec<EntryKey>, key: EntryKey) {
    if !pending.contains(&key) {
        pending.push(key);
    }
}

/// A descriptor set: bound entries plus a pending-write queue flushed in a
/// single `vkUpdateDescriptorSets` call.
pub struct DescriptorSet {
    device: Arc<Device>,
    handle: vk::DescriptorSet,
    bound: HashMap<EntryKey, DescriptorEntry>,
    pending: Vec<EntryKey>,
}

impl DescriptorSet {
    /// Allocates a descriptor set from the device's shared descriptor pool
    /// against `layout`.
    pub fn allocate(device: Arc<Device>, layout: &DescriptorSetLayout) -> VulkanResult<Self> {
        let pool = *device.descriptor_pool().lock();
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let handle = unsafe { device.raw().allocate_descriptor_sets(&alloc_info) }?[0];
        Ok(Self {
            device,
            handle,
            bound: HashMap::new(),
            pending: Vec::new(),
        })
    }

    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Stores `entry` at `(binding, array_index)` and marks it pending.
    pub fn insert(&mut self, binding: u32, array_index: u32, entry: DescriptorEntry) {
        let key = (binding, array_index);
        self.bound.insert(key, entry);
        mark_pending(&mut self.pending, key);
    }

    /// Whether any entry has been inserted since the last flush.
    pub fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flushes every pending entry as a single batched
    /// `vkUpdateDescriptorSets` call, dispatching per-descriptor-type.
    /// `binding_type` resolves the descriptor type declared for a binding
    /// (from the owning layout).
    pub fn flush(&mut self, binding_type: impl Fn(u32) -> Option<vk::DescriptorType>) -> VulkanResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
        let mut texel_buffer_views: Vec<vk::BufferView> = Vec::new();
        let mut inline_data: Vec<Vec<u8>> = Vec::new();
        let mut accel_handles: Vec<vk::AccelerationStructureKHR> = Vec::new();
        let mut writes: Vec<(EntryKey, WriteKind)> = Vec::new();

        for &key in &self.pending {
            let entry = self.bound.get(&key).ok_or_else(|| {
                VulkanError::MissingDescriptor(format!("binding {} array index {} has no bound entry", key.0, key.1))
            })?;
            match entry {
                DescriptorEntry::BufferRange { buffer, offset, range } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: buffer.handle(),
                        offset: *offset,
                        range: *range,
                    });
                    writes.push((key, WriteKind::Buffer(buffer_infos.len() - 1)));
                }
                DescriptorEntry::Image { view, sampler, layout } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: sampler.as_ref().map(|s| s.handle()).unwrap_or(vk::Sampler::null()),
                        image_view: view.handle(),
                        image_layout: *layout,
                    });
                    writes.push((key, WriteKind::Image(image_infos.len() - 1)));
                }
                DescriptorEntry::TexelView { view, format } => {
                    let raw = view.buffer().get_or_create_texel_view(*format, view.offset(), view.range())?;
                    texel_buffer_views.push(raw);
                    writes.push((key, WriteKind::Texel(texel_buffer_views.len() - 1)));
                }
                DescriptorEntry::InlineBytes(bytes) => {
                    inline_data.push(bytes.clone());
                    writes.push((key, WriteKind::Inline(inline_data.len() - 1)));
                }
                DescriptorEntry::AccelerationStructure(handle) => {
                    accel_handles.push(*handle);
                    writes.push((key, WriteKind::Accel(accel_handles.len() - 1)));
                }
            }
        }

        // Extension-struct chains need stable addresses for the lifetime of
        // `vk_writes`; built in their own pass, referenced through
        // `iter_mut()` below rather than re-indexed, since two mutable
        // borrows of the same vector by index can't coexist safely.
        let mut inline_blocks: Vec<vk::WriteDescriptorSetInlineUniformBlock> = inline_data
            .iter()
            .map(|bytes| vk::WriteDescriptorSetInlineUniformBlock::default().data(bytes))
            .collect();
        let mut accel_infos: Vec<vk::WriteDescriptorSetAccelerationStructureKHR> = accel_handles
            .iter()
            .map(|handle| vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(std::slice::from_ref(handle)))
            .collect();

        let mut inline_iter = inline_blocks.iter_mut();
        let mut accel_iter = accel_infos.iter_mut();

        let mut vk_writes = Vec::with_capacity(writes.len());
        for (key, kind) in &writes {
            let descriptor_type = binding_type(key.0).ok_or_else(|| {
                VulkanError::MissingDescriptor(format!("no layout binding {} for descriptor write", key.0))
            })?;
            let mut write = vk::WriteDescriptorSet::default()
                .dst_set(self.handle)
                .dst_binding(key.0)
                .dst_array_element(key.1)
                .descriptor_type(descriptor_type);
            write = match kind {
                WriteKind::Buffer(idx) => write.buffer_info(std::slice::from_ref(&buffer_infos[*idx])),
                WriteKind::Image(idx) => write.image_info(std::slice::from_ref(&image_infos[*idx])),
                WriteKind::Texel(idx) => write.texel_buffer_view(std::slice::from_ref(&texel_buffer_views[*idx])),
                WriteKind::Inline(idx) => {
                    let block = inline_iter.next().expect("one inline block per Inline write");
                    let size = inline_data[*idx].len() as u32;
                    write.push_next(block).descriptor_count(size)
                }
                WriteKind::Accel(_) => {
                    let info = accel_iter.next().expect("one acceleration-structure info per Accel write");
                    write.push_next(info).descriptor_count(1)
                }
            };
            vk_writes.push(write);
        }

        if !vk_writes.is_empty() {
            unsafe { self.device.raw().update_descriptor_sets(&vk_writes, &[]) };
        }
        self.pending.clear();
        Ok(())
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        let pool = *self.device.descriptor_pool().lock();
        let _ = unsafe { self.device.raw().free_descriptor_sets(pool, &[self.handle]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_marks_key_pending_once() {
        let mut pending: Vec<EntryKey> = Vec::new();
        let key = (0u32, 0u32);
        for _ in 0..3 {
            mark_pending(&mut pending, key);
        }
        assert_eq!(pending.len(), 1);
    }
}
