//! Render passes and their per-swapchain-image framebuffers.

use ash::vk;

use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::object::ObjectStatus;
use crate::resource::Images;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Color,
    Depth,
}

#[derive(Clone)]
struct Attachment {
    kind: AttachmentKind,
    format: vk::Format,
    ref_layout: vk::ImageLayout,
    initial_layout: vk::ImageLayout,
    final_layout: vk::ImageLayout,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
}

#[derive(Clone, Copy)]
struct Dependency {
    src_subpass: u32,
    dst_subpass: u32,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
}

/// Attachment/subpass/dependency declarations frozen by `create()`. Clear
/// values stay mutable; they are consumed at `begin_renderpass` time.
pub struct Renderpass {
    gpu: Gpu,
    status: ObjectStatus,
    attachments: Vec<Attachment>,
    clear_values: Vec<vk::ClearValue>,
    subpasses: Vec<Vec<u32>>,
    dependencies: Vec<Dependency>,
    pub(crate) raw: vk::RenderPass,
}

impl Renderpass {
    pub fn new(gpu: &Gpu) -> Renderpass {
        Renderpass {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            attachments: Vec::new(),
            clear_values: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            raw: vk::RenderPass::null(),
        }
    }

    /// Appends a clear value (one per attachment, in attachment order).
    pub fn clear(&mut self, value: vk::ClearValue) {
        self.clear_values.push(value);
    }

    /// Replaces the clear value of attachment `idx`; legal after creation.
    pub fn update_clear(&mut self, idx: usize, value: vk::ClearValue) -> Result<()> {
        let slot = self
            .clear_values
            .get_mut(idx)
            .ok_or(Error::InvalidIndex {
                what: "clear value",
                index: idx,
                count: self.attachments.len(),
            })?;
        *slot = value;
        Ok(())
    }

    pub fn attachment(
        &mut self,
        idx: usize,
        kind: AttachmentKind,
        format: vk::Format,
        ref_layout: vk::ImageLayout,
    ) -> Result<()> {
        self.status.ensure_not_created("renderpass attachment")?;
        if idx != self.attachments.len() {
            return Err(Error::InvalidIndex {
                what: "attachment",
                index: idx,
                count: self.attachments.len(),
            });
        }
        self.attachments.push(Attachment {
            kind,
            format,
            ref_layout,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: ref_layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
        });
        Ok(())
    }

    pub fn attachment_layout(
        &mut self,
        idx: usize,
        initial: vk::ImageLayout,
        final_layout: vk::ImageLayout,
    ) -> Result<()> {
        self.status.ensure_not_created("renderpass attachment layout")?;
        let attachment = self.attachment_mut(idx)?;
        attachment.initial_layout = initial;
        attachment.final_layout = final_layout;
        Ok(())
    }

    pub fn attachment_ops(
        &mut self,
        idx: usize,
        load: vk::AttachmentLoadOp,
        store: vk::AttachmentStoreOp,
    ) -> Result<()> {
        self.status.ensure_not_created("renderpass attachment ops")?;
        let attachment = self.attachment_mut(idx)?;
        attachment.load_op = load;
        attachment.store_op = store;
        Ok(())
    }

    fn attachment_mut(&mut self, idx: usize) -> Result<&mut Attachment> {
        let count = self.attachments.len();
        self.attachments.get_mut(idx).ok_or(Error::InvalidIndex {
            what: "attachment",
            index: idx,
            count,
        })
    }

    /// Declares subpass `idx` referencing the given attachment indices.
    pub fn subpass(&mut self, idx: usize, attachment_refs: &[u32]) -> Result<()> {
        self.status.ensure_not_created("renderpass subpass")?;
        if idx != self.subpasses.len() {
            return Err(Error::InvalidIndex {
                what: "subpass",
                index: idx,
                count: self.subpasses.len(),
            });
        }
        for &a in attachment_refs {
            if a as usize >= self.attachments.len() {
                return Err(Error::InvalidIndex {
                    what: "attachment",
                    index: a as usize,
                    count: self.attachments.len(),
                });
            }
        }
        self.subpasses.push(attachment_refs.to_vec());
        Ok(())
    }

    /// Declares dependency `idx`; `src_subpass` may be
    /// `vk::SUBPASS_EXTERNAL`.
    pub fn dependency(&mut self, idx: usize, src_subpass: u32, dst_subpass: u32) -> Result<()> {
        self.status.ensure_not_created("renderpass dependency")?;
        if idx != self.dependencies.len() {
            return Err(Error::InvalidIndex {
                what: "dependency",
                index: idx,
                count: self.dependencies.len(),
            });
        }
        self.dependencies.push(Dependency {
            src_subpass,
            dst_subpass,
            src_stage: vk::PipelineStageFlags::empty(),
            dst_stage: vk::PipelineStageFlags::empty(),
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::empty(),
        });
        Ok(())
    }

    pub fn dependency_stages(
        &mut self,
        idx: usize,
        src: vk::PipelineStageFlags,
        dst: vk::PipelineStageFlags,
    ) -> Result<()> {
        self.status.ensure_not_created("renderpass dependency stages")?;
        let dep = self.dependency_mut(idx)?;
        dep.src_stage = src;
        dep.dst_stage = dst;
        Ok(())
    }

    pub fn dependency_access(
        &mut self,
        idx: usize,
        src: vk::AccessFlags,
        dst: vk::AccessFlags,
    ) -> Result<()> {
        self.status.ensure_not_created("renderpass dependency access")?;
        let dep = self.dependency_mut(idx)?;
        dep.src_access = src;
        dep.dst_access = dst;
        Ok(())
    }

    fn dependency_mut(&mut self, idx: usize) -> Result<&mut Dependency> {
        let count = self.dependencies.len();
        self.dependencies.get_mut(idx).ok_or(Error::InvalidIndex {
            what: "dependency",
            index: idx,
            count,
        })
    }

    pub fn create(&mut self) -> Result<()> {
        if self.attachments.is_empty() {
            return Err(Error::NotConfigured("renderpass has no attachments"));
        }
        if self.subpasses.is_empty() {
            return Err(Error::NotConfigured("renderpass has no subpasses"));
        }
        log::trace!(
            "creating renderpass with {} attachment(s), {} subpass(es)",
            self.attachments.len(),
            self.subpasses.len()
        );

        let descriptions: Vec<vk::AttachmentDescription> = self
            .attachments
            .iter()
            .map(|a| {
                vk::AttachmentDescription::default()
                    .format(a.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(a.load_op)
                    .store_op(a.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(a.initial_layout)
                    .final_layout(a.final_layout)
            })
            .collect();

        // Per-subpass reference arrays must outlive create_render_pass.
        let mut color_refs: Vec<Vec<vk::AttachmentReference>> = Vec::new();
        let mut depth_refs: Vec<Option<vk::AttachmentReference>> = Vec::new();
        for refs in &self.subpasses {
            let mut colors = Vec::new();
            let mut depth = None;
            for &a in refs {
                let attachment = &self.attachments[a as usize];
                let reference = vk::AttachmentReference::default()
                    .attachment(a)
                    .layout(attachment.ref_layout);
                match attachment.kind {
                    AttachmentKind::Color => colors.push(reference),
                    AttachmentKind::Depth => depth = Some(reference),
                }
            }
            color_refs.push(colors);
            depth_refs.push(depth);
        }

        let subpass_descriptions: Vec<vk::SubpassDescription> = color_refs
            .iter()
            .zip(&depth_refs)
            .map(|(colors, depth)| {
                let mut description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(colors);
                if let Some(depth) = depth {
                    description = description.depth_stencil_attachment(depth);
                }
                description
            })
            .collect();

        let dependencies: Vec<vk::SubpassDependency> = self
            .dependencies
            .iter()
            .map(|d| {
                vk::SubpassDependency::default()
                    .src_subpass(d.src_subpass)
                    .dst_subpass(d.dst_subpass)
                    .src_stage_mask(d.src_stage)
                    .dst_stage_mask(d.dst_stage)
                    .src_access_mask(d.src_access)
                    .dst_access_mask(d.dst_access)
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpass_descriptions)
            .dependencies(&dependencies);

        self.raw = unsafe { self.gpu.shared.raw.create_render_pass(&create_info, None)? };
        self.status.transition(ObjectStatus::Created)?;
        log::trace!("renderpass created");
        Ok(())
    }

    pub(crate) fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }
}

impl Drop for Renderpass {
    fn drop(&mut self) {
        if self.status.is_created() {
            log::trace!("renderpass dropped");
            unsafe {
                self.gpu.shared.raw.destroy_render_pass(self.raw, None);
            }
        }
    }
}

struct FramebufferAttachment {
    views: Vec<vk::ImageView>,
    width: u32,
    height: u32,
}

/// One framebuffer per image of the first attachment's image set.
/// Attachments with a single image (e.g. depth) are shared by all
/// framebuffers. Destroyed and re-created against new images on resize.
pub struct Framebuffers {
    gpu: Gpu,
    status: ObjectStatus,
    attachments: Vec<FramebufferAttachment>,
    raws: Vec<vk::Framebuffer>,
    width: u32,
    height: u32,
}

impl Framebuffers {
    pub fn new(gpu: &Gpu) -> Framebuffers {
        Framebuffers {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            attachments: Vec::new(),
            raws: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    pub fn attachment(&mut self, idx: usize, images: &Images) -> Result<()> {
        self.status.ensure_not_created("framebuffers attachment")?;
        if idx != self.attachments.len() {
            return Err(Error::InvalidIndex {
                what: "framebuffer attachment",
                index: idx,
                count: self.attachments.len(),
            });
        }
        self.attachments.push(FramebufferAttachment {
            views: images.views.clone(),
            width: images.width(),
            height: images.height(),
        });
        Ok(())
    }

    pub fn create(&mut self, renderpass: &Renderpass) -> Result<()> {
        let first = self
            .attachments
            .first()
            .ok_or(Error::NotConfigured("framebuffers have no attachments"))?;
        let count = first.views.len();
        self.width = first.width;
        self.height = first.height;
        log::trace!("creating {count} framebuffer(s)");

        for i in 0..count {
            let views: Vec<vk::ImageView> = self
                .attachments
                .iter()
                .map(|a| {
                    if a.views.len() == 1 {
                        a.views[0]
                    } else {
                        a.views[i.min(a.views.len() - 1)]
                    }
                })
                .collect();
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(renderpass.raw)
                .attachments(&views)
                .width(self.width)
                .height(self.height)
                .layers(1);
            let raw = unsafe { self.gpu.shared.raw.create_framebuffer(&create_info, None)? };
            self.raws.push(raw);
        }

        self.status.transition(ObjectStatus::Created)?;
        Ok(())
    }

    /// Tears the framebuffers down for re-creation against resized images.
    pub fn destroy(&mut self) {
        if !self.status.is_created() {
            return;
        }
        log::trace!("destroying {} framebuffer(s)", self.raws.len());
        unsafe {
            for raw in self.raws.drain(..) {
                self.gpu.shared.raw.destroy_framebuffer(raw, None);
            }
        }
        self.attachments.clear();
        self.status = ObjectStatus::Init;
    }

    pub fn count(&self) -> usize {
        self.raws.len()
    }

    pub(crate) fn raw(&self, idx: usize) -> Result<vk::Framebuffer> {
        self.raws.get(idx).copied().ok_or(Error::InvalidIndex {
            what: "framebuffer",
            index: idx,
            count: self.raws.len(),
        })
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        self.destroy();
    }
}
