//! Command-buffer sets and recording primitives.
//!
//! A `Commands` owns `count` primary command buffers allocated from the pool
//! of one queue's family; index `idx` in `[0, count)` selects one buffer, and
//! recording must be bracketed by `begin(idx)` / `end(idx)`.

use ash::vk;

use crate::binding::Bindings;
use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::pipeline::{Compute, Graphics};
use crate::renderpass::{Framebuffers, Renderpass};
use crate::resource::{Barrier, Buffer, BufferRegions, Images};
use crate::MAX_COMMAND_BUFFERS_PER_SET;

pub struct Commands {
    gpu: Gpu,
    queue_idx: usize,
    pool: vk::CommandPool,
    raws: Vec<vk::CommandBuffer>,
}

impl Commands {
    pub fn new(gpu: &Gpu, queue_idx: usize, count: usize) -> Result<Commands> {
        if count == 0 || count > MAX_COMMAND_BUFFERS_PER_SET {
            return Err(Error::CapacityExceeded {
                what: "command buffers",
                max: MAX_COMMAND_BUFFERS_PER_SET,
            });
        }
        let family = gpu.shared.queues.family_of(queue_idx)?;
        let pool = gpu.shared.queues.pool_for_family(family);
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let raws = unsafe { gpu.shared.raw.allocate_command_buffers(&allocate_info)? };
        log::trace!("allocated {count} command buffer(s) on queue #{queue_idx}");
        Ok(Commands {
            gpu: gpu.clone(),
            queue_idx,
            pool,
            raws,
        })
    }

    pub fn count(&self) -> usize {
        self.raws.len()
    }

    pub fn queue_idx(&self) -> usize {
        self.queue_idx
    }

    pub(crate) fn raw(&self, idx: usize) -> Result<vk::CommandBuffer> {
        self.raws.get(idx).copied().ok_or(Error::InvalidIndex {
            what: "command buffer",
            index: idx,
            count: self.raws.len(),
        })
    }

    pub fn begin(&self, idx: usize) -> Result<()> {
        let raw = self.raw(idx)?;
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe {
            self.gpu.shared.raw.begin_command_buffer(raw, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self, idx: usize) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu.shared.raw.end_command_buffer(raw)?;
        }
        Ok(())
    }

    pub fn reset(&self, idx: usize) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu
                .shared
                .raw
                .reset_command_buffer(raw, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    pub fn reset_all(&self) -> Result<()> {
        for idx in 0..self.raws.len() {
            self.reset(idx)?;
        }
        Ok(())
    }

    /// Returns all buffers to the pool; the set is empty afterwards.
    pub fn free(&mut self) {
        if !self.raws.is_empty() {
            log::trace!("freeing {} command buffer(s)", self.raws.len());
            unsafe {
                self.gpu.shared.raw.free_command_buffers(self.pool, &self.raws);
            }
            self.raws.clear();
        }
    }

    /// One-shot synchronous submission of all buffers in the set; waits for
    /// queue idle before and after. Never use in the frame loop.
    pub fn submit_sync(&self, queue_idx: usize) -> Result<()> {
        log::debug!("[SLOW] submitting {} command buffer(s)", self.raws.len());
        let queue = self.gpu.raw_queue(queue_idx)?;
        unsafe {
            self.gpu.shared.raw.queue_wait_idle(queue)?;
            let info = vk::SubmitInfo::default().command_buffers(&self.raws);
            self.gpu
                .shared
                .raw
                .queue_submit(queue, std::slice::from_ref(&info), vk::Fence::null())?;
            self.gpu.shared.raw.queue_wait_idle(queue)?;
        }
        Ok(())
    }

    // ---- recording primitives -------------------------------------------

    /// Begins the renderpass on framebuffer `idx` (or the only framebuffer
    /// for single-framebuffer sets).
    pub fn begin_renderpass(
        &self,
        idx: usize,
        renderpass: &Renderpass,
        framebuffers: &Framebuffers,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let framebuffer = framebuffers.raw(idx.min(framebuffers.count().saturating_sub(1)))?;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: framebuffers.extent(),
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(renderpass.raw)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(renderpass.clear_values());
        unsafe {
            self.gpu.shared.raw.cmd_begin_render_pass(
                raw,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
        Ok(())
    }

    pub fn end_renderpass(&self, idx: usize) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu.shared.raw.cmd_end_render_pass(raw);
        }
        Ok(())
    }

    /// Sets the viewport and a matching scissor rectangle.
    pub fn viewport(&self, idx: usize, viewport: vk::Viewport) -> Result<()> {
        let raw = self.raw(idx)?;
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.x as i32,
                y: viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: viewport.width as u32,
                height: viewport.height as u32,
            },
        };
        unsafe {
            self.gpu
                .shared
                .raw
                .cmd_set_viewport(raw, 0, std::slice::from_ref(&viewport));
            self.gpu
                .shared
                .raw
                .cmd_set_scissor(raw, 0, std::slice::from_ref(&scissor));
        }
        Ok(())
    }

    /// Binds region `idx` of the set (or the single region) as the vertex
    /// buffer, with an extra byte offset.
    pub fn bind_vertex_buffer(
        &self,
        idx: usize,
        regions: &BufferRegions,
        offset: u64,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let region = idx.min(regions.count() - 1);
        let offsets = [regions.offset(region)? + offset];
        unsafe {
            self.gpu
                .shared
                .raw
                .cmd_bind_vertex_buffers(raw, 0, &[regions.raw], &offsets);
        }
        Ok(())
    }

    pub fn bind_index_buffer(
        &self,
        idx: usize,
        regions: &BufferRegions,
        offset: u64,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let region = idx.min(regions.count() - 1);
        unsafe {
            self.gpu.shared.raw.cmd_bind_index_buffer(
                raw,
                regions.raw,
                regions.offset(region)? + offset,
                vk::IndexType::UINT32,
            );
        }
        Ok(())
    }

    pub fn bind_graphics(
        &self,
        idx: usize,
        graphics: &Graphics,
        bindings: &Bindings,
        set_idx: usize,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let dset = bindings.dset(set_idx)?;
        unsafe {
            self.gpu.shared.raw.cmd_bind_pipeline(
                raw,
                vk::PipelineBindPoint::GRAPHICS,
                graphics.raw,
            );
            self.gpu.shared.raw.cmd_bind_descriptor_sets(
                raw,
                vk::PipelineBindPoint::GRAPHICS,
                bindings.pipeline_layout,
                0,
                std::slice::from_ref(&dset),
                &[],
            );
        }
        Ok(())
    }

    pub fn bind_compute(
        &self,
        idx: usize,
        compute: &Compute,
        bindings: &Bindings,
        set_idx: usize,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let dset = bindings.dset(set_idx)?;
        unsafe {
            self.gpu.shared.raw.cmd_bind_pipeline(
                raw,
                vk::PipelineBindPoint::COMPUTE,
                compute.raw,
            );
            self.gpu.shared.raw.cmd_bind_descriptor_sets(
                raw,
                vk::PipelineBindPoint::COMPUTE,
                bindings.pipeline_layout,
                0,
                std::slice::from_ref(&dset),
                &[],
            );
        }
        Ok(())
    }

    pub fn draw(&self, idx: usize, first_vertex: u32, vertex_count: u32) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu
                .shared
                .raw
                .cmd_draw(raw, vertex_count, 1, first_vertex, 0);
        }
        Ok(())
    }

    pub fn draw_indexed(
        &self,
        idx: usize,
        first_index: u32,
        vertex_offset: i32,
        index_count: u32,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu
                .shared
                .raw
                .cmd_draw_indexed(raw, index_count, 1, first_index, vertex_offset, 0);
        }
        Ok(())
    }

    pub fn dispatch(&self, idx: usize, x: u32, y: u32, z: u32) -> Result<()> {
        let raw = self.raw(idx)?;
        unsafe {
            self.gpu.shared.raw.cmd_dispatch(raw, x, y, z);
        }
        Ok(())
    }

    pub fn copy_buffer(
        &self,
        idx: usize,
        src: &Buffer,
        src_offset: u64,
        dst: &Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        unsafe {
            self.gpu.shared.raw.cmd_copy_buffer(
                raw,
                src.raw,
                dst.raw,
                std::slice::from_ref(&region),
            );
        }
        Ok(())
    }

    /// Copies image `src_idx` of `src` to image `dst_idx` of `dst`; layouts
    /// must already be TRANSFER_SRC/DST_OPTIMAL (or GENERAL).
    pub fn copy_image(
        &self,
        idx: usize,
        src: &Images,
        src_idx: usize,
        dst: &Images,
        dst_idx: usize,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let src_image = src.raws.get(src_idx).copied().ok_or(Error::InvalidIndex {
            what: "image",
            index: src_idx,
            count: src.raws.len(),
        })?;
        let dst_image = dst.raws.get(dst_idx).copied().ok_or(Error::InvalidIndex {
            what: "image",
            index: dst_idx,
            count: dst.raws.len(),
        })?;
        let subresource = |aspect| {
            vk::ImageSubresourceLayers::default()
                .aspect_mask(aspect)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1)
        };
        let region = vk::ImageCopy::default()
            .src_subresource(subresource(src.aspect_flags()))
            .dst_subresource(subresource(dst.aspect_flags()))
            .extent(src.extent3d());
        unsafe {
            self.gpu.shared.raw.cmd_copy_image(
                raw,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
        Ok(())
    }

    pub fn copy_buffer_to_image(
        &self,
        idx: usize,
        src: &Buffer,
        dst: &Images,
        dst_idx: usize,
    ) -> Result<()> {
        let raw = self.raw(idx)?;
        let dst_image = dst.raws.get(dst_idx).copied().ok_or(Error::InvalidIndex {
            what: "image",
            index: dst_idx,
            count: dst.raws.len(),
        })?;
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(dst.aspect_flags())
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(dst.extent3d());
        unsafe {
            self.gpu.shared.raw.cmd_copy_buffer_to_image(
                raw,
                src.raw,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
        }
        Ok(())
    }

    pub fn barrier(&self, idx: usize, barrier: &Barrier) -> Result<()> {
        let raw = self.raw(idx)?;

        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(barrier.image_aspect)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);
        let image_barriers: Vec<vk::ImageMemoryBarrier> = barrier
            .images
            .iter()
            .map(|image| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(barrier.image_src_access)
                    .dst_access_mask(barrier.image_dst_access)
                    .old_layout(barrier.old_layout)
                    .new_layout(barrier.new_layout)
                    .src_queue_family_index(barrier.src_queue_family)
                    .dst_queue_family_index(barrier.dst_queue_family)
                    .image(*image)
                    .subresource_range(subresource_range)
            })
            .collect();

        let buffer_barriers: Vec<vk::BufferMemoryBarrier> = barrier
            .buffer
            .iter()
            .map(|(buffer, offset, size)| {
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(barrier.buffer_src_access)
                    .dst_access_mask(barrier.buffer_dst_access)
                    .src_queue_family_index(barrier.src_queue_family)
                    .dst_queue_family_index(barrier.dst_queue_family)
                    .buffer(*buffer)
                    .offset(*offset)
                    .size(*size)
            })
            .collect();

        unsafe {
            self.gpu.shared.raw.cmd_pipeline_barrier(
                raw,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
        Ok(())
    }
}

impl Drop for Commands {
    fn drop(&mut self) {
        self.free();
    }
}
