//! Images, their cached views, and per-subresource layout/stage/access
//! tracking.

use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::Device;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::trace;

/// A single `(aspect, array layer, mip level)` tuple identifying one
/// tracked subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subresource {
    /// Aspect mask (usually a single bit: color, depth, or stencil).
    pub aspect: vk::ImageAspectFlags,
    /// Array layer index.
    pub layer: u32,
    /// Mip level.
    pub level: u32,
}

/// The tracked layout/stage/access triple for one subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedState {
    /// Current image layout.
    pub layout: vk::ImageLayout,
    /// Pipeline stage of the last write/read that established this layout.
    pub stage: vk::PipelineStageFlags,
    /// Access mask of the last write/read that established this layout.
    pub access: vk::AccessFlags,
}

impl TrackedState {
    const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        access: vk::AccessFlags::empty(),
    };
}

/// Best-guess `(stage, access)` for a target layout, used when a caller
/// does not supply one explicitly.
pub fn guess_stage_access(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;
    match layout {
        L::UNDEFINED => (S::TOP_OF_PIPE, A::empty()),
        L::GENERAL => (S::COMPUTE_SHADER, A::SHADER_READ | A::SHADER_WRITE),
        L::COLOR_ATTACHMENT_OPTIMAL => (S::COLOR_ATTACHMENT_OUTPUT, A::empty()),
        L::DEPTH_ATTACHMENT_OPTIMAL
        | L::STENCIL_ATTACHMENT_OPTIMAL
        | L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        L::DEPTH_READ_ONLY_OPTIMAL | L::STENCIL_READ_ONLY_OPTIMAL | L::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            (S::FRAGMENT_SHADER | S::LATE_FRAGMENT_TESTS, A::DEPTH_STENCIL_ATTACHMENT_READ)
        }
        L::SHADER_READ_ONLY_OPTIMAL => (S::FRAGMENT_SHADER, A::SHADER_READ),
        L::TRANSFER_SRC_OPTIMAL => (S::TRANSFER, A::TRANSFER_READ),
        L::TRANSFER_DST_OPTIMAL => (S::TRANSFER, A::TRANSFER_WRITE),
        L::PRESENT_SRC_KHR => (S::BOTTOM_OF_PIPE, A::empty()),
        _ => (S::TOP_OF_PIPE, A::empty()),
    }
}

/// A key identifying a cached [`vk::ImageView`]: the subresource range and
/// component swizzle it was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewKey {
    /// View type (`2D`, `2D_ARRAY`, `CUBE`, ...).
    pub view_type: vk::ImageViewType,
    /// Covered aspect mask.
    pub aspect: vk::ImageAspectFlags,
    /// First mip level.
    pub base_level: u32,
    /// Mip level count.
    pub level_count: u32,
    /// First array layer.
    pub base_layer: u32,
    /// Array layer count.
    pub layer_count: u32,
    /// Component (swizzle) mapping.
    pub components: ComponentMapping,
}

/// Hashable, `Eq`-able mirror of `vk::ComponentMapping` (the Vulkan type
/// derives neither).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentMapping {
    pub r: vk::ComponentSwizzle,
    pub g: vk::ComponentSwizzle,
    pub b: vk::ComponentSwizzle,
    pub a: vk::ComponentSwizzle,
}

impl Default for ComponentMapping {
    fn default() -> Self {
        Self {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        }
    }
}

impl From<ComponentMapping> for vk::ComponentMapping {
    fn from(c: ComponentMapping) -> Self {
        vk::ComponentMapping { r: c.r, g: c.g, b: c.b, a: c.a }
    }
}

/// A Vulkan image, its memory, and per-subresource tracked state.
pub struct Image {
    device: Arc<Device>,
    handle: vk::Image,
    allocation: crate::device::memory::SubAllocation,
    extent: vk::Extent3D,
    format: vk::Format,
    mip_levels: u32,
    array_layers: u32,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    aspect_mask: vk::ImageAspectFlags,

    tracked: Mutex<HashMap<Subresource, TrackedState>>,
    views: Mutex<HashMap<ViewKey, vk::ImageView>>,
}

impl Image {
    /// Creates a new 2D (or array/cube, via `view_type` used for the
    /// default view) image.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mip_levels: u32,
        array_layers: u32,
        samples: vk::SampleCountFlags,
        aspect_mask: vk::ImageAspectFlags,
        flags: vk::ImageCreateFlags,
    ) -> VulkanResult<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(flags);
        let handle = unsafe { device.raw().create_image(&create_info, None) }?;
        let requirements = unsafe { device.raw().get_image_memory_requirements(handle) };

        let allocation = {
            let mut allocator = device.memory_allocator().lock();
            match allocator.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                Ok(a) => a,
                Err(e) => {
                    unsafe { device.raw().destroy_image(handle, None) };
                    return Err(e);
                }
            }
        };
        let memory = device.memory_allocator().lock().device_memory(allocation);
        if let Err(e) = unsafe { device.raw().bind_image_memory(handle, memory, allocation.offset) } {
            unsafe { device.raw().destroy_image(handle, None) };
            device.memory_allocator().lock().free(allocation);
            return Err(e.into());
        }

        let mut tracked = HashMap::new();
        for layer in 0..array_layers {
            for level in 0..mip_levels {
                tracked.insert(
                    Subresource {
                        aspect: aspect_mask,
                        layer,
                        level,
                    },
                    TrackedState::UNDEFINED,
                );
            }
        }

        trace!("created image {extent:?} {format:?} ({mip_levels} mips, {array_layers} layers)");
        Ok(Self {
            device,
            handle,
            allocation,
            extent,
            format,
            mip_levels,
            array_layers,
            samples,
            usage,
            aspect_mask,
            tracked: Mutex::new(tracked),
            views: Mutex::new(HashMap::new()),
        })
    }

    /// Raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.handle
    }
    /// Image extent.
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }
    /// Image format.
    pub fn format(&self) -> vk::Format {
        self.format
    }
    /// Mip level count.
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
    /// Array layer count.
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }
    /// Sample count.
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
    /// Usage flags.
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }
    /// Default aspect mask for this image (color, or depth/stencil).
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    fn check_range(&self, base_level: u32, level_count: u32, base_layer: u32, layer_count: u32) -> VulkanResult<()> {
        if base_level + level_count > self.mip_levels || base_layer + layer_count > self.array_layers {
            return Err(VulkanError::InvalidSubresource(format!(
                "levels {base_level}..{} / layers {base_layer}..{} exceed image with {} levels, {} layers",
                base_level + level_count,
                base_layer + layer_count,
                self.mip_levels,
                self.array_layers
            )));
        }
        Ok(())
    }

    /// Gets or creates a cached image view over the given range and
    /// component mapping.
    #[allow(clippy::too_many_arguments)]
    pub fn get_or_create_view(
        self: &Arc<Self>,
        view_type: vk::ImageViewType,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
        components: ComponentMapping,
    ) -> VulkanResult<ImageView> {
        self.check_range(base_level, level_count, base_layer, layer_count)?;
        let key = ViewKey {
            view_type,
            aspect: self.aspect_mask,
            base_level,
            level_count,
            base_layer,
            layer_count,
            components,
        };
        let mut views = self.views.lock();
        let handle = if let Some(&v) = views.get(&key) {
            v
        } else {
            let subresource_range = vk::ImageSubresourceRange {
                aspect_mask: self.aspect_mask,
                base_mip_level: base_level,
                level_count,
                base_array_layer: base_layer,
                layer_count,
            };
            let create_info = vk::ImageViewCreateInfo::default()
                .image(self.handle)
                .view_type(view_type)
                .format(self.format)
                .components(components.into())
                .subresource_range(subresource_range);
            let view = unsafe { self.device.raw().create_image_view(&create_info, None) }?;
            views.insert(key, view);
            view
        };
        Ok(ImageView {
            image: self.clone(),
            key,
            handle,
        })
    }

    /// Tracked `(layout, stage, access)` of a single subresource.
    pub fn tracked_state(&self, sub: Subresource) -> Option<TrackedState> {
        self.tracked.lock().get(&sub).copied()
    }

    /// Overwrites tracked state for every subresource the iterator yields.
    /// Used internally by command-buffer barrier emission and by
    /// render-pass finalization.
    pub fn set_tracked_state(&self, subs: impl Iterator<Item = Subresource>, state: TrackedState) {
        let mut tracked = self.tracked.lock();
        for sub in subs {
            tracked.insert(sub, state);
        }
    }

    /// All subresources covered by `(base_level, level_count, base_layer,
    /// layer_count)` at the image's default aspect.
    pub fn subresources(
        &self,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> impl Iterator<Item = Subresource> + '_ {
        let aspect = self.aspect_mask;
        (base_layer..base_layer + layer_count)
            .flat_map(move |layer| (base_level..base_level + level_count).map(move |level| (layer, level)))
            .map(move |(layer, level)| Subresource { aspect, layer, level })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        for (_, view) in self.views.get_mut().drain() {
            unsafe { self.device.raw().destroy_image_view(view, None) };
        }
        unsafe { self.device.raw().destroy_image(self.handle, None) };
        self.device.memory_allocator().lock().free(self.allocation);
    }
}

/// A cached view over an [`Image`]'s subresource range. Holds a strong
/// reference to the owning image; the view itself is destroyed by the
/// image's `Drop`, not this type's.
#[derive(Clone)]
pub struct ImageView {
    image: Arc<Image>,
    key: ViewKey,
    handle: vk::ImageView,
}

impl ImageView {
    /// Raw view handle.
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }
    /// The image this view was created from.
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }
    /// The key (range + type) this view was created with.
    pub fn key(&self) -> ViewKey {
        self.key
    }
    /// Convenience accessor mirroring the owning image's extent.
    pub fn extent(&self) -> vk::Extent3D {
        self.image.extent
    }
    /// Convenience accessor mirroring the owning image's format.
    pub fn format(&self) -> vk::Format {
        self.image.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_stage_access_for_shader_read_only() {
        let (stage, access) = guess_stage_access(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn guess_stage_access_for_transfer_dst() {
        let (stage, access) = guess_stage_access(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn undefined_has_no_access() {
        assert_eq!(TrackedState::UNDEFINED.access, vk::AccessFlags::empty());
        assert_eq!(TrackedState::UNDEFINED.layout, vk::ImageLayout::UNDEFINED);
    }
}
