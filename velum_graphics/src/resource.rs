//! GPU memory resources: buffers, buffer regions, image sets, samplers and
//! pipeline barriers.

use std::mem::size_of_val;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::object::ObjectStatus;
use crate::MAX_BUFFER_REGIONS_PER_SET;

/// Maps explicit memory property flags onto an allocator location.
fn memory_location(flags: vk::MemoryPropertyFlags) -> MemoryLocation {
    let host_visible = flags.contains(
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    );
    if host_visible && flags.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
        MemoryLocation::GpuToCpu
    } else if host_visible {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// One device buffer with a single memory allocation. Configure with the
/// setters, then `create()`.
pub struct Buffer {
    gpu: Gpu,
    status: ObjectStatus,
    size: u64,
    item_size: u64,
    usage: vk::BufferUsageFlags,
    memory: vk::MemoryPropertyFlags,
    queues: Vec<u32>,
    pub(crate) raw: vk::Buffer,
    allocation: Option<Allocation>,
}

impl Buffer {
    pub fn new(gpu: &Gpu) -> Buffer {
        Buffer {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            size: 0,
            item_size: 0,
            usage: vk::BufferUsageFlags::empty(),
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            queues: Vec::new(),
            raw: vk::Buffer::null(),
            allocation: None,
        }
    }

    pub fn size(&mut self, size: u64, item_size: u64) -> Result<()> {
        self.status.ensure_not_created("buffer size")?;
        self.size = size;
        self.item_size = item_size;
        Ok(())
    }

    pub fn usage(&mut self, usage: vk::BufferUsageFlags) -> Result<()> {
        self.status.ensure_not_created("buffer usage")?;
        self.usage = usage;
        Ok(())
    }

    pub fn memory(&mut self, memory: vk::MemoryPropertyFlags) -> Result<()> {
        self.status.ensure_not_created("buffer memory")?;
        self.memory = memory;
        Ok(())
    }

    /// Grants access to the given queue (by index in the GPU's queue set).
    pub fn queue_access(&mut self, queue_idx: usize) -> Result<()> {
        self.status.ensure_not_created("buffer queue access")?;
        let family = self.gpu.shared.queues.family_of(queue_idx)?;
        if !self.queues.contains(&family) {
            self.queues.push(family);
        }
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::NotConfigured("buffer size is zero"));
        }
        if self.usage.is_empty() {
            return Err(Error::NotConfigured("buffer usage is empty"));
        }
        log::trace!("creating buffer of {} bytes", self.size);

        let mut create_info = vk::BufferCreateInfo::default()
            .size(self.size)
            .usage(self.usage);
        if self.queues.len() > 1 {
            create_info = create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&self.queues);
        }

        let raw;
        let requirements;
        unsafe {
            raw = self.gpu.shared.raw.create_buffer(&create_info, None)?;
            requirements = self.gpu.shared.raw.get_buffer_memory_requirements(raw);
        }

        let allocation = self
            .gpu
            .shared
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: memory_location(self.memory),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        unsafe {
            self.gpu
                .shared
                .raw
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())?;
        }

        self.raw = raw;
        self.allocation = Some(allocation);
        self.status.transition(ObjectStatus::Created)?;
        Ok(())
    }

    pub fn byte_size(&self) -> u64 {
        self.size
    }

    pub fn item_size(&self) -> u64 {
        self.item_size
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory.contains(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    fn mapped_ptr(&self) -> Result<*mut u8> {
        self.status.ensure_created("buffer not created")?;
        if !self.is_host_visible() {
            return Err(Error::Unsupported("buffer memory is not host-visible"));
        }
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
            .ok_or(Error::Unsupported("buffer allocation is not mapped"))
    }

    /// Copies `data` into the buffer at byte `offset` through the persistent
    /// host mapping.
    pub fn upload<T: Copy>(&self, offset: u64, data: &[T]) -> Result<()> {
        let bytes = size_of_val(data) as u64;
        self.check_range(offset, bytes)?;
        log::trace!("uploading {bytes} bytes to GPU buffer");
        let ptr = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                ptr.add(offset as usize),
                bytes as usize,
            );
        }
        Ok(())
    }

    /// Copies buffer contents at byte `offset` back into `data`.
    pub fn download<T: Copy>(&self, offset: u64, data: &mut [T]) -> Result<()> {
        let bytes = size_of_val(data) as u64;
        self.check_range(offset, bytes)?;
        log::trace!("downloading {bytes} bytes from GPU buffer");
        let ptr = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.add(offset as usize) as *const u8,
                data.as_mut_ptr() as *mut u8,
                bytes as usize,
            );
        }
        Ok(())
    }

    fn check_range(&self, offset: u64, bytes: u64) -> Result<()> {
        if offset + bytes > self.size {
            return Err(Error::InvalidIndex {
                what: "buffer byte range",
                index: (offset + bytes) as usize,
                count: self.size as usize,
            });
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.status.is_created() {
            log::trace!("buffer dropped");
            unsafe {
                self.gpu.shared.raw.destroy_buffer(self.raw, None);
            }
            if let Some(allocation) = self.allocation.take() {
                if let Err(err) = self.gpu.shared.allocator.lock().free(allocation) {
                    log::error!("failed to free buffer allocation: {err}");
                }
            }
        }
    }
}

/// Up to [`MAX_BUFFER_REGIONS_PER_SET`] equal-size sub-ranges of one buffer.
/// A plain value descriptor: the buffer stays owned elsewhere and must be
/// passed back in for mapped access.
#[derive(Debug, Clone)]
pub struct BufferRegions {
    pub(crate) raw: vk::Buffer,
    pub(crate) count: usize,
    pub(crate) size: u64,
    pub(crate) offsets: [u64; MAX_BUFFER_REGIONS_PER_SET],
}

impl BufferRegions {
    /// `offsets` may be empty (all regions at offset 0, the single-region
    /// case) or provide one offset per region.
    pub fn new(buffer: &Buffer, count: usize, size: u64, offsets: &[u64]) -> Result<BufferRegions> {
        if count == 0 || count > MAX_BUFFER_REGIONS_PER_SET {
            return Err(Error::CapacityExceeded {
                what: "buffer regions",
                max: MAX_BUFFER_REGIONS_PER_SET,
            });
        }
        if !offsets.is_empty() && offsets.len() != count {
            return Err(Error::InvalidIndex {
                what: "buffer region offsets",
                index: offsets.len(),
                count,
            });
        }
        let mut region_offsets = [0u64; MAX_BUFFER_REGIONS_PER_SET];
        for (dst, src) in region_offsets.iter_mut().zip(offsets) {
            *dst = *src;
        }
        for i in 0..count {
            if region_offsets[i] + size > buffer.byte_size() {
                return Err(Error::InvalidIndex {
                    what: "buffer region range",
                    index: (region_offsets[i] + size) as usize,
                    count: buffer.byte_size() as usize,
                });
            }
        }
        Ok(BufferRegions {
            raw: buffer.raw,
            count,
            size,
            offsets: region_offsets,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self, idx: usize) -> Result<u64> {
        if idx >= self.count {
            return Err(Error::InvalidIndex {
                what: "buffer region",
                index: idx,
                count: self.count,
            });
        }
        Ok(self.offsets[idx])
    }

    /// Writes `data` into region `idx`, touching only that sub-range.
    pub fn write<T: Copy>(&self, buffer: &Buffer, idx: usize, data: &[T]) -> Result<()> {
        self.check_buffer(buffer)?;
        let offset = self.offset(idx)?;
        let bytes = size_of_val(data) as u64;
        if bytes > self.size {
            return Err(Error::InvalidIndex {
                what: "region byte range",
                index: bytes as usize,
                count: self.size as usize,
            });
        }
        buffer.upload(offset, data)
    }

    /// Reads region `idx` back into `data`.
    pub fn read<T: Copy>(&self, buffer: &Buffer, idx: usize, data: &mut [T]) -> Result<()> {
        self.check_buffer(buffer)?;
        let offset = self.offset(idx)?;
        let bytes = size_of_val(data) as u64;
        if bytes > self.size {
            return Err(Error::InvalidIndex {
                what: "region byte range",
                index: bytes as usize,
                count: self.size as usize,
            });
        }
        buffer.download(offset, data)
    }

    fn check_buffer(&self, buffer: &Buffer) -> Result<()> {
        if buffer.raw != self.raw {
            return Err(Error::NotConfigured("regions refer to a different buffer"));
        }
        Ok(())
    }
}

/// A set of N images sharing a common configuration, each with its own
/// allocation and view. For swapchain-backed sets the raw images are owned by
/// the swapchain and only the views are managed here.
pub struct Images {
    gpu: Gpu,
    status: ObjectStatus,
    image_type: vk::ImageType,
    pub(crate) count: usize,
    format: vk::Format,
    width: u32,
    height: u32,
    depth: u32,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    memory: vk::MemoryPropertyFlags,
    aspect: vk::ImageAspectFlags,
    initial_layout: Option<vk::ImageLayout>,
    queues: Vec<u32>,
    pub(crate) raws: Vec<vk::Image>,
    pub(crate) views: Vec<vk::ImageView>,
    allocations: Vec<Allocation>,
    swapchain_owned: bool,
}

fn view_type_for(image_type: vk::ImageType) -> vk::ImageViewType {
    match image_type {
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

pub(crate) fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
    )
}

impl Images {
    pub fn new(gpu: &Gpu, image_type: vk::ImageType, count: usize) -> Images {
        Images {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            image_type,
            count,
            format: vk::Format::UNDEFINED,
            width: 0,
            height: 0,
            depth: 1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::empty(),
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect: vk::ImageAspectFlags::COLOR,
            initial_layout: None,
            queues: Vec::new(),
            raws: Vec::new(),
            views: Vec::new(),
            allocations: Vec::new(),
            swapchain_owned: false,
        }
    }

    pub fn format(&mut self, format: vk::Format) -> Result<()> {
        self.status.ensure_not_created("images format")?;
        self.format = format;
        if format_has_depth(format) {
            self.aspect = vk::ImageAspectFlags::DEPTH;
        }
        Ok(())
    }

    pub fn size(&mut self, width: u32, height: u32, depth: u32) -> Result<()> {
        self.status.ensure_not_created("images size")?;
        self.width = width;
        self.height = height;
        self.depth = depth;
        Ok(())
    }

    pub fn tiling(&mut self, tiling: vk::ImageTiling) -> Result<()> {
        self.status.ensure_not_created("images tiling")?;
        self.tiling = tiling;
        Ok(())
    }

    pub fn usage(&mut self, usage: vk::ImageUsageFlags) -> Result<()> {
        self.status.ensure_not_created("images usage")?;
        self.usage = usage;
        Ok(())
    }

    pub fn memory(&mut self, memory: vk::MemoryPropertyFlags) -> Result<()> {
        self.status.ensure_not_created("images memory")?;
        self.memory = memory;
        Ok(())
    }

    pub fn aspect(&mut self, aspect: vk::ImageAspectFlags) -> Result<()> {
        self.status.ensure_not_created("images aspect")?;
        self.aspect = aspect;
        Ok(())
    }

    /// Records the layout a pending barrier should transition the images to.
    pub fn layout(&mut self, layout: vk::ImageLayout) -> Result<()> {
        self.status.ensure_not_created("images layout")?;
        self.initial_layout = Some(layout);
        Ok(())
    }

    pub fn queue_access(&mut self, queue_idx: usize) -> Result<()> {
        self.status.ensure_not_created("images queue access")?;
        let family = self.gpu.shared.queues.family_of(queue_idx)?;
        if !self.queues.contains(&family) {
            self.queues.push(family);
        }
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        if self.format == vk::Format::UNDEFINED {
            return Err(Error::NotConfigured("images format not set"));
        }
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(Error::NotConfigured("images size not set"));
        }
        if self.usage.is_empty() {
            return Err(Error::NotConfigured("images usage not set"));
        }
        log::trace!("creating {} image(s)", self.count);

        for _ in 0..self.count {
            let extent = vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: self.depth,
            };
            let mut create_info = vk::ImageCreateInfo::default()
                .image_type(self.image_type)
                .format(self.format)
                .extent(extent)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(self.tiling)
                .usage(self.usage)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            if self.queues.len() > 1 {
                create_info = create_info
                    .sharing_mode(vk::SharingMode::CONCURRENT)
                    .queue_family_indices(&self.queues);
            }
            let raw = unsafe { self.gpu.shared.raw.create_image(&create_info, None)? };
            let requirements =
                unsafe { self.gpu.shared.raw.get_image_memory_requirements(raw) };
            let allocation = self
                .gpu
                .shared
                .allocator
                .lock()
                .allocate(&AllocationCreateDesc {
                    name: "image",
                    requirements,
                    location: memory_location(self.memory),
                    linear: self.tiling == vk::ImageTiling::LINEAR,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })?;
            unsafe {
                self.gpu
                    .shared
                    .raw
                    .bind_image_memory(raw, allocation.memory(), allocation.offset())?;
            }

            let view = self.create_view(raw)?;
            self.raws.push(raw);
            self.views.push(view);
            self.allocations.push(allocation);
        }

        self.status.transition(ObjectStatus::Created)?;
        log::trace!("{} image(s) created", self.count);
        Ok(())
    }

    fn create_view(&self, raw: vk::Image) -> Result<vk::ImageView> {
        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);
        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(view_type_for(self.image_type))
            .format(self.format)
            .subresource_range(subresource_range);
        Ok(unsafe { self.gpu.shared.raw.create_image_view(&view_info, None)? })
    }

    /// Wraps the swapchain's images: views only, no allocations.
    pub(crate) fn from_swapchain(
        gpu: &Gpu,
        raws: Vec<vk::Image>,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<Images> {
        let mut images = Images::new(gpu, vk::ImageType::TYPE_2D, raws.len());
        images.format = format;
        images.width = extent.width;
        images.height = extent.height;
        images.usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        images.swapchain_owned = true;
        images.raws = raws;
        for raw in images.raws.clone() {
            let view = images.create_view(raw)?;
            images.views.push(view);
        }
        images.status.transition(ObjectStatus::Created)?;
        Ok(images)
    }

    pub(crate) fn rewrap_swapchain(
        &mut self,
        raws: Vec<vk::Image>,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Result<()> {
        debug_assert!(self.swapchain_owned);
        self.release_swapchain_views();
        self.format = format;
        self.width = extent.width;
        self.height = extent.height;
        self.count = raws.len();
        self.raws = raws;
        for raw in self.raws.clone() {
            let view = self.create_view(raw)?;
            self.views.push(view);
        }
        Ok(())
    }

    pub(crate) fn release_swapchain_views(&mut self) {
        debug_assert!(self.swapchain_owned);
        unsafe {
            for view in self.views.drain(..) {
                self.gpu.shared.raw.destroy_image_view(view, None);
            }
        }
        self.raws.clear();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn image_format(&self) -> vk::Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn extent3d(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }

    pub(crate) fn aspect_flags(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// The layout recorded with `layout()`, to be applied by a pending
    /// barrier after creation.
    pub fn pending_layout(&self) -> Option<vk::ImageLayout> {
        self.initial_layout
    }

    /// Reads back image `idx` of a linear, host-visible set, tightly packed
    /// (used for screenshots and render tests; 4 bytes per pixel formats).
    pub fn download(&self, idx: usize, data: &mut [u8]) -> Result<()> {
        self.status.ensure_created("images not created")?;
        if self.swapchain_owned {
            return Err(Error::Unsupported("cannot map swapchain images"));
        }
        if idx >= self.count {
            return Err(Error::InvalidIndex {
                what: "image",
                index: idx,
                count: self.count,
            });
        }
        if self.tiling != vk::ImageTiling::LINEAR {
            return Err(Error::Unsupported("image download requires linear tiling"));
        }
        let allocation = &self.allocations[idx];
        let ptr = allocation
            .mapped_ptr()
            .ok_or(Error::Unsupported("image memory is not host-visible"))?
            .as_ptr() as *const u8;

        let subresource = vk::ImageSubresource::default().aspect_mask(self.aspect);
        let layout = unsafe {
            self.gpu
                .shared
                .raw
                .get_image_subresource_layout(self.raws[idx], subresource)
        };

        let bytes_per_row = (self.width * 4) as usize;
        if data.len() < bytes_per_row * self.height as usize {
            return Err(Error::InvalidIndex {
                what: "image download byte range",
                index: data.len(),
                count: bytes_per_row * self.height as usize,
            });
        }
        for row in 0..self.height as usize {
            let src_offset = layout.offset as usize + row * layout.row_pitch as usize;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    ptr.add(src_offset),
                    data.as_mut_ptr().add(row * bytes_per_row),
                    bytes_per_row,
                );
            }
        }
        Ok(())
    }
}

impl Drop for Images {
    fn drop(&mut self) {
        if !self.status.is_created() {
            return;
        }
        log::trace!("dropping {} image(s)", self.count);
        unsafe {
            for view in self.views.drain(..) {
                self.gpu.shared.raw.destroy_image_view(view, None);
            }
            if !self.swapchain_owned {
                for raw in self.raws.drain(..) {
                    self.gpu.shared.raw.destroy_image(raw, None);
                }
                for allocation in self.allocations.drain(..) {
                    if let Err(err) = self.gpu.shared.allocator.lock().free(allocation) {
                        log::error!("failed to free image allocation: {err}");
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureAxis {
    U,
    V,
    W,
}

pub struct Sampler {
    gpu: Gpu,
    status: ObjectStatus,
    min_filter: vk::Filter,
    mag_filter: vk::Filter,
    address_modes: [vk::SamplerAddressMode; 3],
    pub(crate) raw: vk::Sampler,
}

impl Sampler {
    pub fn new(gpu: &Gpu) -> Sampler {
        Sampler {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            min_filter: vk::Filter::NEAREST,
            mag_filter: vk::Filter::NEAREST,
            address_modes: [vk::SamplerAddressMode::CLAMP_TO_BORDER; 3],
            raw: vk::Sampler::null(),
        }
    }

    pub fn min_filter(&mut self, filter: vk::Filter) -> Result<()> {
        self.status.ensure_not_created("sampler min filter")?;
        self.min_filter = filter;
        Ok(())
    }

    pub fn mag_filter(&mut self, filter: vk::Filter) -> Result<()> {
        self.status.ensure_not_created("sampler mag filter")?;
        self.mag_filter = filter;
        Ok(())
    }

    pub fn address_mode(&mut self, axis: TextureAxis, mode: vk::SamplerAddressMode) -> Result<()> {
        self.status.ensure_not_created("sampler address mode")?;
        self.address_modes[axis as usize] = mode;
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        log::trace!("creating sampler");
        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(self.min_filter)
            .mag_filter(self.mag_filter)
            .address_mode_u(self.address_modes[0])
            .address_mode_v(self.address_modes[1])
            .address_mode_w(self.address_modes[2])
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
        self.raw = unsafe { self.gpu.shared.raw.create_sampler(&create_info, None)? };
        self.status.transition(ObjectStatus::Created)?;
        Ok(())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if self.status.is_created() {
            log::trace!("sampler dropped");
            unsafe {
                self.gpu.shared.raw.destroy_sampler(self.raw, None);
            }
        }
    }
}

/// Ephemeral barrier descriptor recorded into a command buffer; carries no
/// device state of its own.
#[derive(Clone, Default)]
pub struct Barrier {
    pub(crate) src_stage: vk::PipelineStageFlags,
    pub(crate) dst_stage: vk::PipelineStageFlags,

    pub(crate) images: Vec<vk::Image>,
    pub(crate) image_aspect: vk::ImageAspectFlags,
    pub(crate) old_layout: vk::ImageLayout,
    pub(crate) new_layout: vk::ImageLayout,
    pub(crate) image_src_access: vk::AccessFlags,
    pub(crate) image_dst_access: vk::AccessFlags,

    pub(crate) buffer: Option<(vk::Buffer, u64, u64)>,
    pub(crate) buffer_src_access: vk::AccessFlags,
    pub(crate) buffer_dst_access: vk::AccessFlags,

    pub(crate) src_queue_family: u32,
    pub(crate) dst_queue_family: u32,
}

impl Barrier {
    pub fn new() -> Barrier {
        Barrier {
            image_aspect: vk::ImageAspectFlags::COLOR,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            ..Default::default()
        }
    }

    pub fn stages(mut self, src: vk::PipelineStageFlags, dst: vk::PipelineStageFlags) -> Barrier {
        self.src_stage = src;
        self.dst_stage = dst;
        self
    }

    pub fn images(mut self, images: &Images) -> Barrier {
        self.images = images.raws.clone();
        self.image_aspect = images.aspect_flags();
        self
    }

    /// Targets a single image of the set; the layout assertion then applies
    /// to that image only.
    pub fn image(mut self, images: &Images, idx: usize) -> Result<Barrier> {
        let raw = images.raws.get(idx).copied().ok_or(Error::InvalidIndex {
            what: "image",
            index: idx,
            count: images.raws.len(),
        })?;
        self.images = vec![raw];
        self.image_aspect = images.aspect_flags();
        Ok(self)
    }

    pub fn images_layout(mut self, old: vk::ImageLayout, new: vk::ImageLayout) -> Barrier {
        self.old_layout = old;
        self.new_layout = new;
        self
    }

    pub fn images_access(mut self, src: vk::AccessFlags, dst: vk::AccessFlags) -> Barrier {
        self.image_src_access = src;
        self.image_dst_access = dst;
        self
    }

    pub fn buffer(mut self, regions: &BufferRegions, idx: usize) -> Result<Barrier> {
        let offset = regions.offset(idx)?;
        self.buffer = Some((regions.raw, offset, regions.size));
        Ok(self)
    }

    pub fn buffer_access(mut self, src: vk::AccessFlags, dst: vk::AccessFlags) -> Barrier {
        self.buffer_src_access = src;
        self.buffer_dst_access = dst;
        self
    }

    pub fn queue_transfer(mut self, src_family: u32, dst_family: u32) -> Barrier {
        self.src_queue_family = src_family;
        self.dst_queue_family = dst_family;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_location_mapping() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(memory_location(host), MemoryLocation::CpuToGpu);
        assert_eq!(
            memory_location(host | vk::MemoryPropertyFlags::HOST_CACHED),
            MemoryLocation::GpuToCpu
        );
        assert_eq!(
            memory_location(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn depth_formats() {
        assert!(format_has_depth(vk::Format::D32_SFLOAT));
        assert!(!format_has_depth(vk::Format::B8G8R8A8_UNORM));
    }
}
