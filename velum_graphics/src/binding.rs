//! Descriptor binding slots, descriptor-set allocation and reconciliation.
//!
//! A `Bindings` declares its slots, then `create(dset_count)` builds the
//! descriptor-set layout, the pipeline layout and allocates the sets from the
//! GPU's pool. Rebinding a slot after creation marks the object
//! `NeedUpdate`; `update()` rewrites all sets from the current references.

use ash::vk;

use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::object::ObjectStatus;
use crate::resource::{BufferRegions, Images, Sampler};
use crate::MAX_BINDINGS_SIZE;

#[derive(Clone)]
struct TextureRef {
    views: Vec<vk::ImageView>,
    sampler: vk::Sampler,
}

pub struct Bindings {
    gpu: Gpu,
    status: ObjectStatus,
    types: Vec<vk::DescriptorType>,
    dset_count: usize,
    pub(crate) dset_layout: vk::DescriptorSetLayout,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) dsets: Vec<vk::DescriptorSet>,
    buffer_refs: Vec<Option<BufferRegions>>,
    texture_refs: Vec<Option<TextureRef>>,
}

impl Bindings {
    pub fn new(gpu: &Gpu) -> Bindings {
        Bindings {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            types: Vec::new(),
            dset_count: 0,
            dset_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            dsets: Vec::new(),
            buffer_refs: Vec::new(),
            texture_refs: Vec::new(),
        }
    }

    /// Declares slot `idx` (append-only).
    pub fn slot(&mut self, idx: usize, ty: vk::DescriptorType) -> Result<()> {
        self.status.ensure_not_created("bindings slot")?;
        if idx != self.types.len() {
            return Err(Error::InvalidIndex {
                what: "binding slot",
                index: idx,
                count: self.types.len(),
            });
        }
        if self.types.len() >= MAX_BINDINGS_SIZE {
            return Err(Error::CapacityExceeded {
                what: "binding slots",
                max: MAX_BINDINGS_SIZE,
            });
        }
        self.types.push(ty);
        self.buffer_refs.push(None);
        self.texture_refs.push(None);
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.types.len()
    }

    pub fn dset_count(&self) -> usize {
        self.dset_count
    }

    pub fn status(&self) -> ObjectStatus {
        self.status
    }

    /// Builds the layouts and allocates `dset_count` descriptor sets.
    pub fn create(&mut self, dset_count: usize) -> Result<()> {
        self.status.ensure_not_created("bindings create")?;
        if dset_count == 0 {
            return Err(Error::NotConfigured("bindings need at least one set"));
        }
        log::trace!(
            "creating bindings with {} slot(s), {dset_count} set(s)",
            self.types.len()
        );
        self.dset_count = dset_count;

        // References stored before the set count was known are validated now.
        for slot in 0..self.types.len() {
            if let Some(regions) = &self.buffer_refs[slot] {
                self.check_ref_count(regions.count())?;
            } else if let Some(texture) = &self.texture_refs[slot] {
                self.check_ref_count(texture.views.len())?;
            }
        }

        let layout_bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .types
            .iter()
            .enumerate()
            .map(|(idx, ty)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(idx as u32)
                    .descriptor_type(*ty)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        self.dset_layout = unsafe {
            self.gpu
                .shared
                .raw
                .create_descriptor_set_layout(&layout_info, None)?
        };

        let set_layouts = [self.dset_layout];
        let pipeline_layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        self.pipeline_layout = unsafe {
            self.gpu
                .shared
                .raw
                .create_pipeline_layout(&pipeline_layout_info, None)?
        };

        let alloc_layouts = vec![self.dset_layout; dset_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.gpu.shared.dset_pool)
            .set_layouts(&alloc_layouts);
        self.dsets = unsafe { self.gpu.shared.raw.allocate_descriptor_sets(&alloc_info)? };

        self.status.transition(ObjectStatus::Created)?;
        Ok(())
    }

    /// Binds buffer regions to slot `idx`. One region applies to all sets; a
    /// region per set parameterizes each set independently. Any other count
    /// is an error.
    pub fn buffer(&mut self, idx: usize, regions: BufferRegions) -> Result<()> {
        self.check_slot(idx)?;
        self.check_ref_count(regions.count())?;
        self.buffer_refs[idx] = Some(regions);
        self.texture_refs[idx] = None;
        self.mark_need_update();
        Ok(())
    }

    pub fn texture(&mut self, idx: usize, images: &Images, sampler: &Sampler) -> Result<()> {
        self.check_slot(idx)?;
        self.check_ref_count(images.count())?;
        self.texture_refs[idx] = Some(TextureRef {
            views: images.views.clone(),
            sampler: sampler.raw,
        });
        self.buffer_refs[idx] = None;
        self.mark_need_update();
        Ok(())
    }

    fn check_slot(&self, idx: usize) -> Result<()> {
        if idx >= self.types.len() {
            return Err(Error::InvalidIndex {
                what: "binding slot",
                index: idx,
                count: self.types.len(),
            });
        }
        Ok(())
    }

    /// A bound resource count of 1 broadcasts to all sets; `dset_count`
    /// parameterizes each set. Before creation the set count is unknown and
    /// the check runs at `create()`.
    fn check_ref_count(&self, count: usize) -> Result<()> {
        if self.dset_count != 0 && count != 1 && count != self.dset_count {
            return Err(Error::InvalidIndex {
                what: "binding resource count",
                index: count,
                count: self.dset_count,
            });
        }
        Ok(())
    }

    fn mark_need_update(&mut self) {
        if self.status == ObjectStatus::Created {
            self.status = ObjectStatus::NeedUpdate;
        }
    }

    /// Rewrites all descriptor sets from the current references.
    pub fn update(&mut self) -> Result<()> {
        self.status.ensure_created("bindings not created")?;
        log::trace!("updating {} descriptor set(s)", self.dset_count);

        // Every stored reference must broadcast (count 1) or parameterize
        // each set (count dset_count), however early it was bound.
        for slot in 0..self.types.len() {
            if let Some(regions) = &self.buffer_refs[slot] {
                self.check_ref_count(regions.count())?;
            } else if let Some(texture) = &self.texture_refs[slot] {
                self.check_ref_count(texture.views.len())?;
            }
        }

        // Resource infos must stay alive (and stable) until the write call;
        // collect them fully before building the write structures.
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
        // (set, slot, info index, is_buffer)
        let mut pending: Vec<(usize, usize, usize, bool)> = Vec::new();

        for set in 0..self.dset_count {
            for slot in 0..self.types.len() {
                if let Some(regions) = &self.buffer_refs[slot] {
                    let region = if regions.count() == 1 { 0 } else { set };
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(regions.raw)
                            .offset(regions.offset(region)?)
                            .range(regions.size()),
                    );
                    pending.push((set, slot, buffer_infos.len() - 1, true));
                } else if let Some(texture) = &self.texture_refs[slot] {
                    let view = if texture.views.len() == 1 {
                        texture.views[0]
                    } else {
                        texture.views[set]
                    };
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .sampler(texture.sampler)
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                    );
                    pending.push((set, slot, image_infos.len() - 1, false));
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet> = pending
            .iter()
            .map(|&(set, slot, info, is_buffer)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.dsets[set])
                    .dst_binding(slot as u32)
                    .dst_array_element(0)
                    .descriptor_type(self.types[slot]);
                if is_buffer {
                    write.buffer_info(std::slice::from_ref(&buffer_infos[info]))
                } else {
                    write.image_info(std::slice::from_ref(&image_infos[info]))
                }
            })
            .collect();

        unsafe {
            self.gpu.shared.raw.update_descriptor_sets(&writes, &[]);
        }

        if self.status == ObjectStatus::NeedUpdate {
            self.status.transition(ObjectStatus::Created)?;
        }
        Ok(())
    }

    pub(crate) fn dset(&self, idx: usize) -> Result<vk::DescriptorSet> {
        self.dsets.get(idx).copied().ok_or(Error::InvalidIndex {
            what: "descriptor set",
            index: idx,
            count: self.dsets.len(),
        })
    }
}

impl Drop for Bindings {
    fn drop(&mut self) {
        if self.status.is_created() {
            log::trace!("bindings dropped");
            unsafe {
                if !self.dsets.is_empty() {
                    let _ = self
                        .gpu
                        .shared
                        .raw
                        .free_descriptor_sets(self.gpu.shared.dset_pool, &self.dsets);
                }
                self.gpu
                    .shared
                    .raw
                    .destroy_pipeline_layout(self.pipeline_layout, None);
                self.gpu
                    .shared
                    .raw
                    .destroy_descriptor_set_layout(self.dset_layout, None);
            }
        }
    }
}
