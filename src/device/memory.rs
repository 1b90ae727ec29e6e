//! Sub-allocating device-memory pool.
//!
//! Each memory-type index owns an ordered list of fixed-size [`Block`]s; a
//! request walks the gaps between live sub-allocations in each block
//! (first fit) before falling back to allocating a new block.

use ash::vk;
use std::collections::BTreeMap;

use crate::error::{VulkanError, VulkanResult};
use crate::logging::{debug, trace};

/// Minimum size of a freshly allocated [`Block`]; large enough to amortise
/// the driver's `vkAllocateMemory` call-count limit.
pub const MIN_BLOCK_SIZE: vk::DeviceSize = 256 * 1024 * 1024;

/// A handle to a live sub-allocation. Freed explicitly via
/// [`MemoryAllocator::free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAllocation {
    /// Memory-type index the allocation came from.
    pub memory_type_index: u32,
    /// Index of the owning block within that memory type's block list.
    pub block_index: usize,
    /// Offset within the block's `vk::DeviceMemory`.
    pub offset: vk::DeviceSize,
    /// Size of the sub-allocation in bytes.
    pub size: vk::DeviceSize,
}

impl SubAllocation {
    /// Whether this sub-allocation came from host-visible memory, given the
    /// owning allocator (callers typically check via
    /// [`MemoryAllocator::is_host_visible`] instead).
    pub fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }
}

struct Block {
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped_ptr: Option<*mut u8>,
    // start offset -> end offset, for every live sub-allocation in this block.
    live: BTreeMap<vk::DeviceSize, vk::DeviceSize>,
}

struct TypePool {
    property_flags: vk::MemoryPropertyFlags,
    blocks: Vec<Block>,
}

/// Sub-allocates device memory out of large fixed blocks, one pool per
/// memory-type index.
pub struct MemoryAllocator {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    pools: Vec<TypePool>,
}

impl MemoryAllocator {
    /// Creates an allocator bound to `device`, querying memory properties
    /// from `physical_device`.
    pub fn new(instance: &ash::Instance, device: ash::Device, physical_device: vk::PhysicalDevice) -> Self {
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let pools = (0..memory_properties.memory_type_count)
            .map(|i| TypePool {
                property_flags: memory_properties.memory_types[i as usize].property_flags,
                blocks: Vec::new(),
            })
            .collect();
        Self {
            device,
            memory_properties,
            pools,
        }
    }

    /// Picks the memory-type index with the fewest extraneous property
    /// flags among those compatible with `type_bits` and that include
    /// `required`.
    fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        (0..self.memory_properties.memory_type_count)
            .filter(|&i| type_bits & (1 << i) != 0)
            .filter(|&i| {
                self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(required)
            })
            .min_by_key(|&i| {
                self.memory_properties.memory_types[i as usize]
                    .property_flags
                    .as_raw()
                    .count_ones()
            })
    }

    /// Whether sub-allocations from `memory_type_index` are host-visible.
    pub fn is_host_visible(&self, memory_type_index: u32) -> bool {
        self.pools[memory_type_index as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Allocates `requirements.size` bytes satisfying `requirements` and
    /// `required_flags`.
    pub fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        required_flags: vk::MemoryPropertyFlags,
    ) -> VulkanResult<SubAllocation> {
        let memory_type_index = self
            .find_memory_type(requirements.memory_type_bits, required_flags)
            .ok_or(VulkanError::OutOfDeviceMemory {
                requested: requirements.size,
            })?;

        let pool = &mut self.pools[memory_type_index as usize];
        let alignment = requirements.alignment.max(1);

        for (block_index, block) in pool.blocks.iter_mut().enumerate() {
            if let Some(offset) = find_gap(&block.live, block.size, requirements.size, alignment) {
                block.live.insert(offset, offset + requirements.size);
                trace!(
                    "sub-allocated {} bytes at offset {} in block {} (type {})",
                    requirements.size,
                    offset,
                    block_index,
                    memory_type_index
                );
                return Ok(SubAllocation {
                    memory_type_index,
                    block_index,
                    offset,
                    size: requirements.size,
                });
            }
        }

        let block_size = requirements.size.max(MIN_BLOCK_SIZE);
        let host_visible = pool.property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(block_size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(|e| {
            if e == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY {
                VulkanError::OutOfDeviceMemory { requested: block_size }
            } else {
                VulkanError::VulkanApi(e)
            }
        })?;

        let mapped_ptr = if host_visible {
            let ptr = unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(VulkanError::VulkanApi)?;
            Some(ptr.cast::<u8>())
        } else {
            None
        };

        let mut live = BTreeMap::new();
        live.insert(0, requirements.size);
        pool.blocks.push(Block {
            memory,
            size: block_size,
            mapped_ptr,
            live,
        });
        let block_index = pool.blocks.len() - 1;
        debug!(
            "allocated new {}-byte memory block (type {}, block {})",
            block_size, memory_type_index, block_index
        );
        Ok(SubAllocation {
            memory_type_index,
            block_index,
            offset: 0,
            size: requirements.size,
        })
    }

    /// Releases a sub-allocation. If its block becomes empty and is not the
    /// only block of that memory type, the block is freed immediately.
    pub fn free(&mut self, sub: SubAllocation) {
        let pool = &mut self.pools[sub.memory_type_index as usize];
        let Some(block) = pool.blocks.get_mut(sub.block_index) else {
            return;
        };
        block.live.remove(&sub.offset);
        if block.live.is_empty() && pool.blocks.len() > 1 {
            let block = pool.blocks.remove(sub.block_index);
            unsafe {
                if block.mapped_ptr.is_some() {
                    self.device.unmap_memory(block.memory);
                }
                self.device.free_memory(block.memory, None);
            }
        }
    }

    /// Raw `vk::DeviceMemory` handle backing a sub-allocation's block.
    pub fn device_memory(&self, sub: SubAllocation) -> vk::DeviceMemory {
        self.pools[sub.memory_type_index as usize].blocks[sub.block_index].memory
    }

    /// Host pointer to the start of a sub-allocation, if its block is
    /// mapped.
    pub fn mapped_ptr(&self, sub: SubAllocation) -> Option<*mut u8> {
        let block = &self.pools[sub.memory_type_index as usize].blocks[sub.block_index];
        block.mapped_ptr.map(|p| unsafe { p.add(sub.offset as usize) })
    }
}

/// Scans `live` sub-allocations (sorted by start offset) for the first gap
/// of at least `size` bytes, honoring `alignment`. Returns the aligned
/// start offset of that gap, if any.
fn find_gap(
    live: &BTreeMap<vk::DeviceSize, vk::DeviceSize>,
    block_size: vk::DeviceSize,
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
) -> Option<vk::DeviceSize> {
    let mut cursor: vk::DeviceSize = 0;
    for (&start, &end) in live {
        let aligned = align_up(cursor, alignment);
        if aligned + size <= start {
            return Some(aligned);
        }
        cursor = end;
    }
    let aligned = align_up(cursor, alignment);
    if aligned + size <= block_size {
        Some(aligned)
    } else {
        None
    }
}

fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment == 0 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaps(pairs: &[(vk::DeviceSize, vk::DeviceSize)]) -> BTreeMap<vk::DeviceSize, vk::DeviceSize> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn finds_gap_at_start_when_empty() {
        let live = gaps(&[]);
        assert_eq!(find_gap(&live, 1024, 64, 16), Some(0));
    }

    #[test]
    fn skips_too_small_gap_between_allocations() {
        let live = gaps(&[(0, 16), (32, 1024)]);
        // gap between 16 and 32 is 16 bytes, requesting 64 does not fit there.
        assert_eq!(find_gap(&live, 2048, 64, 16), Some(1024));
    }

    #[test]
    fn fits_in_gap_respecting_alignment() {
        let live = gaps(&[(0, 10), (256, 1024)]);
        // gap [10, 256) is 246 bytes; alignment 64 rounds 10 up to 64, leaves 192 bytes.
        assert_eq!(find_gap(&live, 2048, 128, 64), Some(64));
    }

    #[test]
    fn returns_none_when_block_is_full() {
        let live = gaps(&[(0, 1024)]);
        assert_eq!(find_gap(&live, 1024, 1, 1), None);
    }

    #[test]
    fn align_up_rounds_to_next_multiple() {
        assert_eq!(align_up(10, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(0, 256), 0);
    }
}
