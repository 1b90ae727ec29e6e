//! Command buffers: recording, automatic image-layout transitions,
//! binding-cache elision, and resource lifetime tracking.

use ash::vk;
use std::sync::{Arc, Weak};

use crate::device::Device;
use crate::error::{VulkanError, VulkanResult};
use crate::logging::trace;
use crate::pipeline::{ComputePipeline, DescriptorSet, GraphicsPipeline};
use crate::render_pass::{Framebuffer, RenderPass};
use crate::resource::image::guess_stage_access;
use crate::resource::{Buffer, Image, Subresource, TrackedState};

/// Lifecycle state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Recording,
    InFlight,
    Done,
}

/// Type-erased strong reference kept alive for the duration a command
/// buffer might still reference it on the GPU.
enum HeldResource {
    Buffer(Arc<Buffer>),
    Image(Arc<Image>),
    DescriptorSet(Arc<DescriptorSet>),
    GraphicsPipeline(Arc<GraphicsPipeline>),
    ComputePipeline(Arc<ComputePipeline>),
}

struct ActiveRenderPass {
    render_pass: Arc<RenderPass>,
    framebuffer: Arc<Framebuffer>,
    subpass_index: u32,
}

/// A recorded command buffer with automatic resource lifetime tracking
/// and image-layout transitions.
///
/// `CommandBuffer` is `!Send`: a command pool (and thus every buffer
/// allocated from it) is exclusively owned by the thread that first
/// created it.
pub struct CommandBuffer {
    device: Arc<Device>,
    handle: vk::CommandBuffer,
    pool: vk::CommandPool,
    queue_family_index: u32,
    fence: vk::Fence,
    state: State,

    held: Vec<HeldResource>,
    active_render_pass: Option<ActiveRenderPass>,

    bound_pipeline: Option<vk::Pipeline>,
    bound_index_buffer: Option<(vk::Buffer, vk::DeviceSize, vk::IndexType)>,
    bound_vertex_buffers: Vec<Option<(vk::Buffer, vk::DeviceSize)>>,
    bound_descriptor_sets: Vec<Option<vk::DescriptorSet>>,

    _not_send: std::marker::PhantomData<*const ()>,
}

impl CommandBuffer {
    /// Allocates and begins recording a new primary command buffer from
    /// the device's per-thread pool for `queue_family_index`.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = device.command_pool_for(queue_family_index)?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = unsafe { device.raw().allocate_command_buffers(&alloc_info) }?[0];
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { device.raw().create_fence(&fence_info, None) }?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.raw().begin_command_buffer(handle, &begin_info) }?;

        Ok(Self {
            device,
            handle,
            pool,
            queue_family_index,
            fence,
            state: State::Recording,
            held: Vec::new(),
            active_render_pass: None,
            bound_pipeline: None,
            bound_index_buffer: None,
            bound_vertex_buffers: Vec::new(),
            bound_descriptor_sets: Vec::new(),
            _not_send: std::marker::PhantomData,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }
    pub fn state(&self) -> State {
        self.state
    }
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
    pub(crate) fn fence(&self) -> vk::Fence {
        self.fence
    }

    fn require_recording(&self) -> VulkanResult<()> {
        if self.state != State::Recording {
            return Err(VulkanError::NotRecording);
        }
        Ok(())
    }

    /// Registers a strong reference so the resource outlives this command
    /// buffer's submission.
    pub fn hold_buffer(&mut self, buffer: Arc<Buffer>) {
        self.held.push(HeldResource::Buffer(buffer));
    }
    pub fn hold_image(&mut self, image: Arc<Image>) {
        self.held.push(HeldResource::Image(image));
    }
    pub fn hold_descriptor_set(&mut self, set: Arc<DescriptorSet>) {
        self.held.push(HeldResource::DescriptorSet(set));
    }
    pub fn hold_graphics_pipeline(&mut self, pipeline: Arc<GraphicsPipeline>) {
        self.held.push(HeldResource::GraphicsPipeline(pipeline));
    }
    pub fn hold_compute_pipeline(&mut self, pipeline: Arc<ComputePipeline>) {
        self.held.push(HeldResource::ComputePipeline(pipeline));
    }

    /// Transitions every subresource in `(base_level, level_count,
    /// base_layer, layer_count)` of `image` to `new_layout`, emitting a
    /// barrier only if the tracked state actually changes or either side
    /// writes. Stage/access are guessed from `new_layout` unless
    /// `dst_stage_access` overrides them.
    #[allow(clippy::too_many_arguments)]
    pub fn transition_barrier(
        &mut self,
        image: &Arc<Image>,
        new_layout: vk::ImageLayout,
        base_level: u32,
        level_count: u32,
        base_layer: u32,
        layer_count: u32,
        dst_stage_access: Option<(vk::PipelineStageFlags, vk::AccessFlags)>,
    ) -> VulkanResult<()> {
        self.require_recording()?;
        let (dst_stage, dst_access) = dst_stage_access.unwrap_or_else(|| guess_stage_access(new_layout));

        let subs: Vec<Subresource> = image.subresources(base_level, level_count, base_layer, layer_count).collect();
        for sub in &subs {
            let old = image.tracked_state(*sub).unwrap_or(TrackedState {
                layout: vk::ImageLayout::UNDEFINED,
                stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                access: vk::AccessFlags::empty(),
            });
            let needs_barrier = (old.layout, old.stage, old.access) != (new_layout, dst_stage, dst_access)
                || old.access.contains(vk::AccessFlags::SHADER_WRITE)
                || dst_access.contains(vk::AccessFlags::SHADER_WRITE);
            if needs_barrier {
                let barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(old.layout)
                    .new_layout(new_layout)
                    .src_access_mask(old.access)
                    .dst_access_mask(dst_access)
                    .image(image.handle())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: sub.aspect,
                        base_mip_level: sub.level,
                        level_count: 1,
                        base_array_layer: sub.layer,
                        layer_count: 1,
                    })
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED);
                unsafe {
                    self.device.raw().cmd_pipeline_barrier(
                        self.handle,
                        old.stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
            }
        }

        image.set_tracked_state(
            subs.into_iter(),
            TrackedState {
                layout: new_layout,
                stage: dst_stage,
                access: dst_access,
            },
        );
        self.hold_image(image.clone());
        Ok(())
    }

    /// Generates the full mip chain for `image` from mip 0 via a sequence
    /// of blits, halving each dimension per level. `image` must have been
    /// created with both `TRANSFER_SRC` and `TRANSFER_DST` usage.
    ///
    /// Mip 0 transitions to `TRANSFER_SRC_OPTIMAL`; every other mip starts
    /// in `TRANSFER_DST_OPTIMAL` as the blit target and is itself
    /// transitioned to `TRANSFER_SRC_OPTIMAL` once populated so the next
    /// level can blit from it. After the final level every mip ends in
    /// `TRANSFER_SRC_OPTIMAL`, ready for a caller to transition the whole
    /// chain to its eventual read layout in one barrier.
    pub fn generate_mip_maps(&mut self, image: &Arc<Image>, base_layer: u32, layer_count: u32) -> VulkanResult<()> {
        self.require_recording()?;
        let mip_levels = image.mip_levels();
        if mip_levels <= 1 {
            return self.transition_barrier(
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                0,
                mip_levels,
                base_layer,
                layer_count,
                None,
            );
        }

        self.transition_barrier(image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, 0, 1, base_layer, layer_count, None)?;
        self.transition_barrier(
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
            mip_levels - 1,
            base_layer,
            layer_count,
            None,
        )?;

        let extent = image.extent();
        let (mut src_width, mut src_height) = (extent.width.max(1), extent.height.max(1));
        let aspect = image.aspect_mask();

        for level in 1..mip_levels {
            let dst_width = (src_width / 2).max(1);
            let dst_height = (src_height / 2).max(1);

            let blit = vk::ImageBlit::default()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level - 1,
                    base_array_layer: base_layer,
                    layer_count,
                })
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: src_width as i32,
                        y: src_height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: level,
                    base_array_layer: base_layer,
                    layer_count,
                })
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: dst_width as i32,
                        y: dst_height as i32,
                        z: 1,
                    },
                ]);

            unsafe {
                self.device.raw().cmd_blit_image(
                    self.handle,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
            }

            self.transition_barrier(
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                level,
                1,
                base_layer,
                layer_count,
                None,
            )?;

            src_width = dst_width;
            src_height = dst_height;
        }

        self.hold_image(image.clone());
        Ok(())
    }

    /// Begins a render pass at subpass 0. Attachment tracked state is
    /// frozen until [`CommandBuffer::end_render_pass`].
    pub fn begin_render_pass(
        &mut self,
        render_pass: Arc<RenderPass>,
        framebuffer: Arc<Framebuffer>,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> VulkanResult<()> {
        self.require_recording()?;
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(render_area)
            .clear_values(clear_values);
        unsafe { self.device.raw().cmd_begin_render_pass(self.handle, &begin_info, contents) };
        self.active_render_pass = Some(ActiveRenderPass {
            render_pass,
            framebuffer,
            subpass_index: 0,
        });
        Ok(())
    }

    /// Advances to the next subpass.
    pub fn next_subpass(&mut self, contents: vk::SubpassContents) -> VulkanResult<()> {
        let active = self.active_render_pass.as_mut().ok_or(VulkanError::NotInRenderPass)?;
        unsafe { self.device.raw().cmd_next_subpass(self.handle, contents) };
        active.subpass_index += 1;
        Ok(())
    }

    /// Ends the active render pass, updating every attachment's tracked
    /// state to its declared final layout.
    pub fn end_render_pass(&mut self) -> VulkanResult<()> {
        let active = self.active_render_pass.take().ok_or(VulkanError::NotInRenderPass)?;
        unsafe { self.device.raw().cmd_end_render_pass(self.handle) };

        for (index, (_name, desc)) in active.render_pass.attachment_order().iter().enumerate() {
            if let Some(view) = active.framebuffer.attachment(index) {
                let (stage, access) = guess_stage_access(desc.final_layout);
                let image = view.image();
                let subs: Vec<Subresource> = image
                    .subresources(0, image.mip_levels(), 0, image.array_layers())
                    .collect();
                image.set_tracked_state(
                    subs.into_iter(),
                    TrackedState {
                        layout: desc.final_layout,
                        stage,
                        access,
                    },
                );
            }
        }
        Ok(())
    }

    /// Binds a graphics or compute pipeline, skipping the call if the same
    /// handle is already bound.
    pub fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, handle: vk::Pipeline) {
        if self.bound_pipeline == Some(handle) {
            return;
        }
        unsafe { self.device.raw().cmd_bind_pipeline(self.handle, bind_point, handle) };
        self.bound_pipeline = Some(handle);
    }

    /// Binds a vertex buffer at `binding`, skipping the call if the same
    /// `(buffer, offset)` is already bound there.
    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        let idx = binding as usize;
        if self.bound_vertex_buffers.len() <= idx {
            self.bound_vertex_buffers.resize(idx + 1, None);
        }
        if self.bound_vertex_buffers[idx] == Some((buffer, offset)) {
            return;
        }
        unsafe { self.device.raw().cmd_bind_vertex_buffers(self.handle, binding, &[buffer], &[offset]) };
        self.bound_vertex_buffers[idx] = Some((buffer, offset));
    }

    /// Binds an index buffer, skipping the call if identical to the
    /// currently bound one.
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        if self.bound_index_buffer == Some((buffer, offset, index_type)) {
            return;
        }
        unsafe { self.device.raw().cmd_bind_index_buffer(self.handle, buffer, offset, index_type) };
        self.bound_index_buffer = Some((buffer, offset, index_type));
    }

    /// Binds a descriptor set at `set_index`, skipping the call if the
    /// same set handle is already bound there. The set must have no
    /// pending writes.
    pub fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        let idx = set_index as usize;
        if self.bound_descriptor_sets.len() <= idx {
            self.bound_descriptor_sets.resize(idx + 1, None);
        }
        if self.bound_descriptor_sets[idx] == Some(set) {
            return;
        }
        unsafe {
            self.device
                .raw()
                .cmd_bind_descriptor_sets(self.handle, bind_point, layout, set_index, &[set], &[]);
        }
        self.bound_descriptor_sets[idx] = Some(set);
    }

    /// Pushes `data` at `offset` for `stage_flags`.
    pub fn push_constants<T: bytemuck::Pod>(&mut self, layout: vk::PipelineLayout, stage_flags: vk::ShaderStageFlags, offset: u32, data: &T) {
        let bytes = bytemuck::bytes_of(data);
        unsafe {
            self.device
                .raw()
                .cmd_push_constants(self.handle, layout, stage_flags, offset, bytes);
        }
    }

    /// Records a non-indexed draw.
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .raw()
                .cmd_draw(self.handle, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    /// Records an indexed draw.
    pub fn draw_indexed(&self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.device.raw().cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Records a compute dispatch of `(x, y, z)` workgroups.
    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe { self.device.raw().cmd_dispatch(self.handle, x, y, z) };
    }

    /// Records a compute dispatch covering `(width, height, depth)` work
    /// items, rounding up to whole workgroups of `workgroup_size`.
    pub fn dispatch_over(&self, width: u32, height: u32, depth: u32, workgroup_size: [u32; 3]) {
        let groups = |extent: u32, size: u32| extent.div_ceil(size.max(1));
        self.dispatch(
            groups(width, workgroup_size[0]),
            groups(height, workgroup_size[1]),
            groups(depth, workgroup_size[2]),
        );
    }

    /// Ends recording. The command buffer becomes submittable via
    /// [`Device::submit`](crate::device::Device) equivalents built on top
    /// of this crate (submission itself is left to the caller, which owns
    /// the queue and semaphores to wait/signal).
    pub fn end(&mut self) -> VulkanResult<()> {
        self.require_recording()?;
        if self.active_render_pass.is_some() {
            return Err(VulkanError::WrongState("command buffer ended while inside a render pass".to_string()));
        }
        unsafe { self.device.raw().end_command_buffer(self.handle) }?;
        Ok(())
    }

    /// Marks this command buffer as submitted (in flight). Called by the
    /// code that actually calls `vkQueueSubmit` with this buffer's handle
    /// and fence.
    pub fn mark_submitted(&mut self) {
        self.state = State::InFlight;
    }

    /// Polls the fence; if signalled, transitions to `Done`, drops every
    /// held resource reference, and resets the command buffer for reuse.
    /// Returns whether the buffer is now idle (`Done`).
    pub fn clear_if_done(&mut self) -> VulkanResult<bool> {
        if self.state != State::InFlight {
            return Ok(self.state == State::Done);
        }
        let signalled = unsafe { self.device.raw().get_fence_status(self.fence) };
        match signalled {
            Ok(()) => {
                self.state = State::Done;
                self.held.clear();
                trace!("command buffer {:?} reaped", self.handle);
                Ok(true)
            }
            Err(vk::Result::NOT_READY) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resets this command buffer back to `Recording`, clearing the
    /// binding cache and tracked resources, ready for a new batch of
    /// commands.
    pub fn reset(&mut self) -> VulkanResult<()> {
        unsafe { self.device.raw().reset_fences(&[self.fence]) }?;
        unsafe {
            self.device
                .raw()
                .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
        }?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.raw().begin_command_buffer(self.handle, &begin_info) }?;
        self.state = State::Recording;
        self.held.clear();
        self.bound_pipeline = None;
        self.bound_index_buffer = None;
        self.bound_vertex_buffers.clear();
        self.bound_descriptor_sets.clear();
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.state == State::InFlight {
            panic!("CommandBuffer dropped while still in flight");
        }
        unsafe {
            self.device.raw().destroy_fence(self.fence, None);
            self.device.raw().free_command_buffers(self.pool, &[self.handle]);
        }
    }
}

/// Reverse-tracking handle a resource can hold back to command buffers
/// that reference it, used for `in_use()` polling without a strong
/// reference cycle.
pub type CommandBufferWeakRef = Weak<parking_lot::Mutex<CommandBuffer>>;

/// Submits `command_buffer` to its own queue family's first queue,
/// ending recording first if still in progress. `wait` pairs a semaphore
/// with the stage that should wait on it; `signal` semaphores are
/// signalled on completion.
pub fn submit(
    device: &Device,
    command_buffer: &mut CommandBuffer,
    wait: &[(vk::Semaphore, vk::PipelineStageFlags)],
    signal: &[vk::Semaphore],
) -> VulkanResult<()> {
    if command_buffer.state == State::Recording {
        command_buffer.end()?;
    }
    let queue = device
        .queue(command_buffer.queue_family_index)
        .ok_or_else(|| VulkanError::WrongState("no queue for family".to_string()))?;

    let wait_semaphores: Vec<vk::Semaphore> = wait.iter().map(|(s, _)| *s).collect();
    let wait_stages: Vec<vk::PipelineStageFlags> = wait.iter().map(|(_, s)| *s).collect();
    let buffers = [command_buffer.handle];
    let submit_info = vk::SubmitInfo::default()
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(&buffers)
        .signal_semaphores(signal);

    unsafe { device.raw().queue_submit(queue, &[submit_info], command_buffer.fence) }?;
    command_buffer.mark_submitted();
    Ok(())
}
