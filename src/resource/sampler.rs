//! Immutable sampler wrapper.

use ash::vk;
use std::sync::Arc;

use crate::device::Device;
use crate::error::VulkanResult;

/// A Vulkan sampler. Created once and reused; there is no mutation after
/// construction.
pub struct Sampler {
    device: Arc<Device>,
    handle: vk::Sampler,
    create_info: vk::SamplerCreateInfo<'static>,
}

impl Sampler {
    /// Creates a sampler from a full create-info struct, matching whatever
    /// shader reflection or caller-supplied defaults produced it.
    pub fn new(device: Arc<Device>, create_info: vk::SamplerCreateInfo<'static>) -> VulkanResult<Self> {
        let handle = unsafe { device.raw().create_sampler(&create_info, None) }?;
        Ok(Self {
            device,
            handle,
            create_info,
        })
    }

    /// A reasonable default: linear filtering, repeat addressing, no
    /// anisotropy.
    pub fn linear_repeat(device: Arc<Device>) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        Self::new(device, create_info)
    }

    /// Raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    /// The create-info this sampler was built from, used to compare
    /// immutable-sampler requests for equality without re-creating a
    /// sampler object.
    pub fn create_info(&self) -> &vk::SamplerCreateInfo<'static> {
        &self.create_info
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_sampler(self.handle, None) };
    }
}
