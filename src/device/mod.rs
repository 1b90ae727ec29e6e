//! Logical device: owns the memory allocator, pipeline cache, descriptor
//! pool, and per-thread queue-family command pools.

pub mod instance;
pub mod memory;
pub mod queue;

use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;

use crate::config::CoreConfig;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::{debug, info, warn};
use memory::MemoryAllocator;
use queue::QueueFamily;

/// Default descriptor-pool sizing ratios: one set's worth of headroom
/// per descriptor type, fixed rather than derived from actual usage.
const DESCRIPTOR_POOL_RATIOS: &[(vk::DescriptorType, u32)] = &[
    (vk::DescriptorType::UNIFORM_BUFFER, 64),
    (vk::DescriptorType::STORAGE_BUFFER, 32),
    (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 128),
    (vk::DescriptorType::SAMPLED_IMAGE, 32),
    (vk::DescriptorType::STORAGE_IMAGE, 16),
    (vk::DescriptorType::SAMPLER, 16),
    (vk::DescriptorType::INPUT_ATTACHMENT, 8),
];
const DESCRIPTOR_POOL_MAX_SETS: u32 = 256;

/// The logical device and everything it shares across command buffers.
pub struct Device {
    pub(crate) instance: ash::Instance,
    pub(crate) device: ash::Device,
    physical_device: vk::PhysicalDevice,
    limits: vk::PhysicalDeviceLimits,

    memory_allocator: Mutex<MemoryAllocator>,
    pipeline_cache: vk::PipelineCache,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    queue_families: Mutex<HashMap<u32, QueueFamily>>,

    persist_pipeline_cache: bool,
}

impl Device {
    /// Builds a `Device` over an already-created `ash::Device`, wiring up
    /// the allocator, descriptor pool, pipeline cache, and queue families.
    pub fn new(
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        config: &CoreConfig,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let mut queue_families = HashMap::new();
        for (index, props) in queue_family_properties.iter().enumerate() {
            let index = index as u32;
            let queue_count = props.queue_count.min(1);
            let queues = (0..queue_count)
                .map(|i| unsafe { device.get_device_queue(index, i) })
                .collect();
            queue_families.insert(index, QueueFamily::new(index, queues, *props));
        }

        let pipeline_cache = Self::load_pipeline_cache(&device, config)?;

        let pool_sizes: Vec<vk::DescriptorPoolSize> = DESCRIPTOR_POOL_RATIOS
            .iter()
            .map(|&(ty, count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(DESCRIPTOR_POOL_MAX_SETS)
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }?;

        let memory_allocator = MemoryAllocator::new(&instance, device.clone(), physical_device);

        info!("device created ({} queue families)", queue_families.len());

        Ok(Self {
            instance,
            device,
            physical_device,
            limits: properties.limits,
            memory_allocator: Mutex::new(memory_allocator),
            pipeline_cache,
            descriptor_pool: Mutex::new(descriptor_pool),
            queue_families: Mutex::new(queue_families),
            persist_pipeline_cache: config.pipeline_cache,
        })
    }

    fn load_pipeline_cache(device: &ash::Device, config: &CoreConfig) -> VulkanResult<vk::PipelineCache> {
        let initial_data = if config.pipeline_cache {
            fs::read(CoreConfig::pipeline_cache_path()).unwrap_or_default()
        } else {
            Vec::new()
        };
        let info = vk::PipelineCacheCreateInfo::default().initial_data(&initial_data);
        let cache = unsafe { device.create_pipeline_cache(&info, None) }?;
        if !initial_data.is_empty() {
            debug!("loaded pipeline cache ({} bytes)", initial_data.len());
        }
        Ok(cache)
    }

    /// Writes the current pipeline cache contents to disk, unless disabled
    /// in the config this device was built with.
    pub fn persist_pipeline_cache(&self) -> VulkanResult<()> {
        if !self.persist_pipeline_cache {
            return Ok(());
        }
        let data = unsafe { self.device.get_pipeline_cache_data(self.pipeline_cache) }?;
        if let Err(e) = fs::write(CoreConfig::pipeline_cache_path(), &data) {
            warn!("failed to persist pipeline cache: {e}");
        } else {
            debug!("persisted pipeline cache ({} bytes)", data.len());
        }
        Ok(())
    }

    /// The raw `ash::Device` handle.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// The physical device this logical device was created from.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Physical device limits, queried once at construction.
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    /// The shared pipeline cache every pipeline is created against.
    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    /// Locked access to the shared descriptor pool.
    pub fn descriptor_pool(&self) -> &Mutex<vk::DescriptorPool> {
        &self.descriptor_pool
    }

    /// Locked access to the shared sub-allocating memory pool.
    pub fn memory_allocator(&self) -> &Mutex<MemoryAllocator> {
        &self.memory_allocator
    }

    /// Returns the command pool for `queue_family_index` on the calling
    /// thread, creating both the family entry (if new) and the pool (if
    /// new) on demand.
    pub fn command_pool_for(&self, queue_family_index: u32) -> VulkanResult<vk::CommandPool> {
        let mut families = self.queue_families.lock();
        let family = families
            .get_mut(&queue_family_index)
            .ok_or_else(|| VulkanError::WrongState(format!("no queue family {queue_family_index}")))?;
        family.pool_for_current_thread(&self.device)
    }

    /// First queue family whose flags are a superset of `required`.
    pub fn find_queue_family(&self, required: vk::QueueFlags) -> Option<u32> {
        self.queue_families
            .lock()
            .iter()
            .find(|(_, family)| family.properties.queue_flags.contains(required))
            .map(|(&index, _)| index)
    }

    /// The first queue retrieved from `queue_family_index`.
    pub fn queue(&self, queue_family_index: u32) -> Option<vk::Queue> {
        self.queue_families
            .lock()
            .get(&queue_family_index)
            .and_then(|f| f.queues.first().copied())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for family in self.queue_families.get_mut().values_mut() {
                family.destroy_all(&self.device);
            }
            self.device.destroy_descriptor_pool(*self.descriptor_pool.get_mut(), None);
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
            self.device.destroy_device(None);
        }
    }
}
