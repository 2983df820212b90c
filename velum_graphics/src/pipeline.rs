//! Shader modules and compute/graphics pipeline assembly.
//!
//! Shader code is consumed as opaque SPIR-V binaries loaded from a path;
//! compilation happens outside this crate.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use ash::vk;

use crate::binding::Bindings;
use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::object::ObjectStatus;
use crate::renderpass::Renderpass;

pub struct ShaderModule {
    gpu: Gpu,
    pub(crate) raw: vk::ShaderModule,
}

/// Loads a SPIR-V binary from `path` and wraps it in a shader module.
pub fn load_shader_module(gpu: &Gpu, path: impl AsRef<Path>) -> Result<ShaderModule> {
    let path = path.as_ref();
    log::trace!("loading shader module from {}", path.display());
    let bytes = std::fs::read(path)?;
    let mut cursor = std::io::Cursor::new(bytes);
    let code = ash::util::read_spv(&mut cursor)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    let raw = unsafe { gpu.shared.raw.create_shader_module(&create_info, None)? };
    Ok(ShaderModule {
        gpu: gpu.clone(),
        raw,
    })
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.gpu.shared.raw.destroy_shader_module(self.raw, None);
        }
    }
}

/// Compute pipeline: one shader module plus the Bindings' pipeline layout.
pub struct Compute {
    gpu: Gpu,
    status: ObjectStatus,
    shader_path: PathBuf,
    module: Option<ShaderModule>,
    pipeline_layout: vk::PipelineLayout,
    pub(crate) raw: vk::Pipeline,
}

impl Compute {
    pub fn new(gpu: &Gpu, shader_path: impl Into<PathBuf>) -> Compute {
        Compute {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            shader_path: shader_path.into(),
            module: None,
            pipeline_layout: vk::PipelineLayout::null(),
            raw: vk::Pipeline::null(),
        }
    }

    /// The Bindings must be created before being attached here.
    pub fn bindings(&mut self, bindings: &Bindings) -> Result<()> {
        self.status.ensure_not_created("compute bindings")?;
        bindings.status().ensure_created("bindings not created")?;
        self.pipeline_layout = bindings.pipeline_layout;
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        if self.pipeline_layout == vk::PipelineLayout::null() {
            return Err(Error::NotConfigured(
                "compute pipeline needs bindings before create",
            ));
        }
        log::trace!("creating compute pipeline");
        let module = load_shader_module(&self.gpu, &self.shader_path)?;

        let entry_point = CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module.raw)
            .name(&entry_point);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(self.pipeline_layout);

        self.raw = unsafe {
            self.gpu
                .shared
                .raw
                .create_compute_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
                .map_err(|(_, err)| Error::from(err))?[0]
        };
        self.module = Some(module);
        self.status.transition(ObjectStatus::Created)?;
        Ok(())
    }
}

impl Drop for Compute {
    fn drop(&mut self) {
        if self.status.is_created() {
            log::trace!("compute pipeline dropped");
            unsafe {
                self.gpu.shared.raw.destroy_pipeline(self.raw, None);
            }
        }
    }
}

/// Graphics pipeline assembled against a renderpass subpass. Viewport and
/// scissor are dynamic; everything else is baked at `create()`.
pub struct Graphics {
    gpu: Gpu,
    status: ObjectStatus,
    renderpass_raw: vk::RenderPass,
    subpass: u32,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend: bool,
    depth_test: bool,
    shaders: Vec<(vk::ShaderStageFlags, PathBuf)>,
    modules: Vec<ShaderModule>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attrs: Vec<vk::VertexInputAttributeDescription>,
    pipeline_layout: vk::PipelineLayout,
    pub(crate) raw: vk::Pipeline,
}

impl Graphics {
    pub fn new(gpu: &Gpu) -> Graphics {
        Graphics {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            renderpass_raw: vk::RenderPass::null(),
            subpass: 0,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend: true,
            depth_test: false,
            shaders: Vec::new(),
            modules: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attrs: Vec::new(),
            pipeline_layout: vk::PipelineLayout::null(),
            raw: vk::Pipeline::null(),
        }
    }

    pub fn renderpass(&mut self, renderpass: &Renderpass, subpass: u32) -> Result<()> {
        self.status.ensure_not_created("graphics renderpass")?;
        self.renderpass_raw = renderpass.raw;
        self.subpass = subpass;
        Ok(())
    }

    pub fn topology(&mut self, topology: vk::PrimitiveTopology) -> Result<()> {
        self.status.ensure_not_created("graphics topology")?;
        self.topology = topology;
        Ok(())
    }

    pub fn polygon_mode(&mut self, mode: vk::PolygonMode) -> Result<()> {
        self.status.ensure_not_created("graphics polygon mode")?;
        self.polygon_mode = mode;
        Ok(())
    }

    pub fn cull_mode(&mut self, mode: vk::CullModeFlags) -> Result<()> {
        self.status.ensure_not_created("graphics cull mode")?;
        self.cull_mode = mode;
        Ok(())
    }

    pub fn front_face(&mut self, front_face: vk::FrontFace) -> Result<()> {
        self.status.ensure_not_created("graphics front face")?;
        self.front_face = front_face;
        Ok(())
    }

    pub fn blend(&mut self, enable: bool) -> Result<()> {
        self.status.ensure_not_created("graphics blend")?;
        self.blend = enable;
        Ok(())
    }

    pub fn depth_test(&mut self, enable: bool) -> Result<()> {
        self.status.ensure_not_created("graphics depth test")?;
        self.depth_test = enable;
        Ok(())
    }

    pub fn shader(&mut self, stage: vk::ShaderStageFlags, path: impl Into<PathBuf>) -> Result<()> {
        self.status.ensure_not_created("graphics shader")?;
        self.shaders.push((stage, path.into()));
        Ok(())
    }

    pub fn vertex_binding(&mut self, binding: u32, stride: u64) -> Result<()> {
        self.status.ensure_not_created("graphics vertex binding")?;
        self.vertex_bindings.push(
            vk::VertexInputBindingDescription::default()
                .binding(binding)
                .stride(stride as u32)
                .input_rate(vk::VertexInputRate::VERTEX),
        );
        Ok(())
    }

    pub fn vertex_attr(
        &mut self,
        binding: u32,
        location: u32,
        format: vk::Format,
        offset: u64,
    ) -> Result<()> {
        self.status.ensure_not_created("graphics vertex attr")?;
        self.vertex_attrs.push(
            vk::VertexInputAttributeDescription::default()
                .binding(binding)
                .location(location)
                .format(format)
                .offset(offset as u32),
        );
        Ok(())
    }

    pub fn bindings(&mut self, bindings: &Bindings) -> Result<()> {
        self.status.ensure_not_created("graphics bindings")?;
        bindings.status().ensure_created("bindings not created")?;
        self.pipeline_layout = bindings.pipeline_layout;
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        if self.renderpass_raw == vk::RenderPass::null() {
            return Err(Error::NotConfigured("graphics pipeline needs a renderpass"));
        }
        if self.shaders.is_empty() {
            return Err(Error::NotConfigured("graphics pipeline needs shaders"));
        }
        if self.pipeline_layout == vk::PipelineLayout::null() {
            return Err(Error::NotConfigured("graphics pipeline needs bindings"));
        }
        log::trace!("creating graphics pipeline");

        let mut modules = Vec::new();
        for (_, path) in &self.shaders {
            modules.push(load_shader_module(&self.gpu, path)?);
        }

        let entry_point = CString::new("main").unwrap();
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .shaders
            .iter()
            .zip(&modules)
            .map(|((stage, _), module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(module.raw)
                    .name(&entry_point)
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attrs);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let color_blend_attachment = if self.blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let color_blend_attachments = [color_blend_attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .render_pass(self.renderpass_raw)
            .subpass(self.subpass);

        self.raw = unsafe {
            self.gpu
                .shared
                .raw
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(&create_info),
                    None,
                )
                .map_err(|(_, err)| Error::from(err))?[0]
        };
        self.modules = modules;
        self.status.transition(ObjectStatus::Created)?;
        Ok(())
    }

    /// Tears the pipeline down, keeping the configuration so it can be
    /// re-created (the only supported form of re-creation).
    pub fn destroy(&mut self) {
        if self.status.is_created() {
            unsafe {
                self.gpu.shared.raw.destroy_pipeline(self.raw, None);
            }
            self.raw = vk::Pipeline::null();
            self.modules.clear();
            self.status = ObjectStatus::Init;
        }
    }
}

impl Drop for Graphics {
    fn drop(&mut self) {
        if self.status.is_created() {
            log::trace!("graphics pipeline dropped");
            unsafe {
                self.gpu.shared.raw.destroy_pipeline(self.raw, None);
            }
        }
    }
}
