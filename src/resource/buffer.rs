//! GPU buffers, their typed strided views, and cached texel views.

use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::memory::SubAllocation;
use crate::device::Device;
use crate::error::VulkanResult;
use crate::logging::trace;

/// A key identifying a cached [`vk::BufferView`]: the format and byte
/// range it was created over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelViewKey {
    /// Texel format of the view.
    pub format: vk::Format,
    /// Byte offset into the buffer.
    pub offset: vk::DeviceSize,
    /// Byte range covered, or `vk::WHOLE_SIZE`.
    pub range: vk::DeviceSize,
}

/// A Vulkan buffer plus the memory sub-allocation backing it.
pub struct Buffer {
    device: Arc<Device>,
    handle: vk::Buffer,
    allocation: SubAllocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,

    texel_views: Mutex<HashMap<TexelViewKey, vk::BufferView>>,
}

impl Buffer {
    /// Creates a buffer of `size` bytes with `usage`, backed by memory
    /// satisfying `memory_flags`.
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { device.raw().create_buffer(&create_info, None) }?;
        let requirements = unsafe { device.raw().get_buffer_memory_requirements(handle) };

        let allocation = {
            let mut allocator = device.memory_allocator().lock();
            match allocator.allocate(requirements, memory_flags) {
                Ok(a) => a,
                Err(e) => {
                    unsafe { device.raw().destroy_buffer(handle, None) };
                    return Err(e);
                }
            }
        };

        let memory = device.memory_allocator().lock().device_memory(allocation);
        if let Err(e) = unsafe { device.raw().bind_buffer_memory(handle, memory, allocation.offset) } {
            unsafe { device.raw().destroy_buffer(handle, None) };
            device.memory_allocator().lock().free(allocation);
            return Err(e.into());
        }

        trace!("created buffer of {size} bytes ({usage:?})");
        Ok(Self {
            device,
            handle,
            allocation,
            size,
            usage,
            texel_views: Mutex::new(HashMap::new()),
        })
    }

    /// Raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags this buffer was created with.
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Host pointer into the mapped memory backing this buffer, if its
    /// allocation is host-visible.
    ///
    /// # Safety
    /// The caller must not read/write past `size` bytes and must
    /// externally synchronize with any GPU access to the same range.
    pub unsafe fn mapped_ptr(&self) -> Option<*mut u8> {
        self.device.memory_allocator().lock().mapped_ptr(self.allocation)
    }

    /// Copies `data` into the buffer's mapped memory at `offset`. Fails
    /// silently (no-op) if the buffer is not host-visible; callers that
    /// need a hard guarantee should check [`Buffer::is_host_visible`]
    /// first.
    pub fn write_data<T: bytemuck::Pod>(&self, offset: vk::DeviceSize, data: &[T]) {
        let Some(ptr) = (unsafe { self.mapped_ptr() }) else {
            return;
        };
        let bytes = bytemuck::cast_slice(data);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
        }
    }

    /// Whether this buffer's backing memory is host-visible.
    pub fn is_host_visible(&self) -> bool {
        self.device
            .memory_allocator()
            .lock()
            .is_host_visible(self.allocation.memory_type_index)
    }

    /// A strided typed view over a sub-range of this buffer.
    pub fn view<T>(self: &Arc<Self>, offset: vk::DeviceSize, stride: vk::DeviceSize, count: u64) -> BufferView<T> {
        BufferView {
            buffer: self.clone(),
            offset,
            stride,
            count,
            _marker: std::marker::PhantomData,
        }
    }

    /// Gets or creates a cached `vk::BufferView` over `(format, offset,
    /// range)`, for use with uniform/storage texel buffer descriptors.
    pub fn get_or_create_texel_view(
        &self,
        format: vk::Format,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> VulkanResult<vk::BufferView> {
        let key = TexelViewKey { format, offset, range };
        let mut views = self.texel_views.lock();
        if let Some(&view) = views.get(&key) {
            return Ok(view);
        }
        let create_info = vk::BufferViewCreateInfo::default()
            .buffer(self.handle)
            .format(format)
            .offset(offset)
            .range(range);
        let view = unsafe { self.device.raw().create_buffer_view(&create_info, None) }?;
        views.insert(key, view);
        Ok(view)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        for (_, view) in self.texel_views.get_mut().drain() {
            unsafe { self.device.raw().destroy_buffer_view(view, None) };
        }
        unsafe { self.device.raw().destroy_buffer(self.handle, None) };
        self.device.memory_allocator().lock().free(self.allocation);
    }
}

/// A typed, strided view over a range of a [`Buffer`]; holds a strong
/// reference to its buffer. Equality and hashing are structural.
#[derive(Clone)]
pub struct BufferView<T> {
    buffer: Arc<Buffer>,
    offset: vk::DeviceSize,
    stride: vk::DeviceSize,
    count: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T> BufferView<T> {
    /// The buffer this view reads from.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Byte offset of the first element.
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Stride between elements, in bytes.
    pub fn stride(&self) -> vk::DeviceSize {
        self.stride
    }

    /// Number of elements.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Total byte range this view spans.
    pub fn range(&self) -> vk::DeviceSize {
        self.stride * self.count
    }
}

impl<T> PartialEq for BufferView<T> {
    fn eq(&self, other: &Self) -> bool {
        self.buffer.handle == other.buffer.handle
            && self.offset == other.offset
            && self.stride == other.stride
            && self.count == other.count
    }
}
impl<T> Eq for BufferView<T> {}

impl<T> std::hash::Hash for BufferView<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.buffer.handle.hash(state);
        self.offset.hash(state);
        self.stride.hash(state);
        self.count.hash(state);
    }
}
