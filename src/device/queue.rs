//! Per-thread, per-queue-family command pool bookkeeping.

use ash::vk;
use std::collections::HashMap;
use std::thread::ThreadId;

use crate::error::VulkanResult;

/// One Vulkan queue family: its queues, properties, and the command pools
/// threads have opened against it so far.
pub struct QueueFamily {
    /// Index of this family as reported by `vkGetPhysicalDeviceQueueFamilyProperties`.
    pub family_index: u32,
    /// Queues retrieved from this family.
    pub queues: Vec<vk::Queue>,
    /// Queue family properties (flags, queue count, timestamp bits).
    pub properties: vk::QueueFamilyProperties,
    // A command pool is exclusively owned by the thread that first created
    // it; `CommandBuffer` (and thus everything that touches a pool) is
    // `!Send`, so no cross-thread synchronization is required here beyond
    // the map insert itself.
    pools: HashMap<ThreadId, vk::CommandPool>,
}

impl QueueFamily {
    pub(crate) fn new(family_index: u32, queues: Vec<vk::Queue>, properties: vk::QueueFamilyProperties) -> Self {
        Self {
            family_index,
            queues,
            properties,
            pools: HashMap::new(),
        }
    }

    /// Returns the command pool for the calling thread, creating it on
    /// first use.
    pub fn pool_for_current_thread(&mut self, device: &ash::Device) -> VulkanResult<vk::CommandPool> {
        let thread_id = std::thread::current().id();
        if let Some(&pool) = self.pools.get(&thread_id) {
            return Ok(pool);
        }
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&create_info, None) }?;
        self.pools.insert(thread_id, pool);
        Ok(pool)
    }

    /// Destroys every command pool this family has opened. Must only be
    /// called once, with no outstanding command buffers.
    pub(crate) fn destroy_all(&mut self, device: &ash::Device) {
        for (_, pool) in self.pools.drain() {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }
}

/// Selects the index of the first queue family whose flags are a superset
/// of `required`.
pub fn find_queue_family_index(
    properties: &[vk::QueueFamilyProperties],
    required: vk::QueueFlags,
) -> Option<u32> {
    properties
        .iter()
        .position(|p| p.queue_flags.contains(required))
        .map(|i| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            timestamp_valid_bits: 0,
            min_image_transfer_granularity: vk::Extent3D::default(),
        }
    }

    #[test]
    fn finds_first_matching_family() {
        let families = [
            props(vk::QueueFlags::TRANSFER),
            props(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            props(vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(find_queue_family_index(&families, vk::QueueFlags::GRAPHICS), Some(1));
        assert_eq!(find_queue_family_index(&families, vk::QueueFlags::COMPUTE), Some(1));
    }

    #[test]
    fn returns_none_when_no_family_matches() {
        let families = [props(vk::QueueFlags::TRANSFER)];
        assert_eq!(find_queue_family_index(&families, vk::QueueFlags::GRAPHICS), None);
    }
}
