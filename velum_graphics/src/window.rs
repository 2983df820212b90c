//! Backend window surface and swapchain.

use ash::khr;
use ash::vk;

use crate::app::App;
use crate::backend::{BackendWindow, SharedBackend, WindowSize};
use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::object::ObjectStatus;
use crate::resource::Images;
use crate::sync::Semaphores;
use crate::MAX_SWAPCHAIN_IMAGES;

pub struct Surface {
    pub(crate) raw_ash: khr::surface::Instance,
    pub(crate) raw: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn supports_family(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> Result<bool> {
        let supported = unsafe {
            self.raw_ash
                .get_physical_device_surface_support(physical_device, family_index, self.raw)?
        };
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.raw_ash.destroy_surface(self.raw, None);
        }
    }
}

/// Native window plus its Vulkan surface. A window may be bound to at most
/// one swapchain at a time.
pub struct Window {
    backend: SharedBackend,
    pub(crate) backend_window: BackendWindow,
    pub(crate) surface: Surface,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl Window {
    pub fn new(app: &App, width: u32, height: u32) -> Result<Window> {
        let (backend_window, window_handle, display_handle) =
            app.backend.lock().create_window(width, height)?;

        let raw = unsafe {
            ash_window::create_surface(
                &app.instance.entry,
                &app.instance.raw,
                display_handle,
                window_handle,
                None,
            )?
        };
        let raw_ash = khr::surface::Instance::new(&app.instance.entry, &app.instance.raw);

        Ok(Window {
            backend: app.backend.clone(),
            backend_window,
            surface: Surface { raw_ash, raw },
            width,
            height,
        })
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn size(&self) -> WindowSize {
        self.backend.lock().window_size(self.backend_window)
    }

    pub fn should_close(&self) -> bool {
        self.backend.lock().should_close(self.backend_window)
    }

    pub(crate) fn shared_backend(&self) -> SharedBackend {
        self.backend.clone()
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        log::trace!("window dropped");
        self.backend.lock().destroy_window(self.backend_window);
    }
}

/// Result of an acquire or present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Ok(u32),
    NeedRecreate,
    Invalid,
}

/// Default present mode: FIFO, or IMMEDIATE when the `VKL_FPS` environment
/// variable is set (uncapped frame rate for benchmarking).
pub fn default_present_mode() -> vk::PresentModeKHR {
    if std::env::var_os("VKL_FPS").is_some() {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub struct Swapchain {
    gpu: Gpu,
    status: ObjectStatus,
    surface_raw: vk::SurfaceKHR,
    surface_ash: khr::surface::Instance,
    raw_ash: khr::swapchain::Device,
    raw: vk::SwapchainKHR,
    min_img_count: u32,
    format: vk::Format,
    present_mode: vk::PresentModeKHR,
    pub(crate) img_count: u32,
    pub(crate) img_idx: u32,
    pub(crate) extent: vk::Extent2D,
    images: Option<Images>,
}

impl Swapchain {
    pub fn new(gpu: &Gpu, window: &Window, min_img_count: u32) -> Swapchain {
        let raw_ash =
            khr::swapchain::Device::new(&gpu.shared.instance.raw, &gpu.shared.raw);
        Swapchain {
            gpu: gpu.clone(),
            status: ObjectStatus::Init,
            surface_raw: window.surface.raw,
            surface_ash: window.surface.raw_ash.clone(),
            raw_ash,
            raw: vk::SwapchainKHR::null(),
            min_img_count,
            format: vk::Format::B8G8R8A8_UNORM,
            present_mode: default_present_mode(),
            img_count: 0,
            img_idx: 0,
            extent: vk::Extent2D::default(),
            images: None,
        }
    }

    pub fn format(&mut self, format: vk::Format) -> Result<()> {
        self.status.ensure_not_created("swapchain format")?;
        self.format = format;
        Ok(())
    }

    pub fn present_mode(&mut self, present_mode: vk::PresentModeKHR) -> Result<()> {
        self.status.ensure_not_created("swapchain present mode")?;
        self.present_mode = present_mode;
        Ok(())
    }

    pub fn create(&mut self) -> Result<()> {
        log::trace!("creating swapchain");
        self.create_raw()?;
        self.status.transition(ObjectStatus::Created)?;
        log::trace!("swapchain created with {} images", self.img_count);
        Ok(())
    }

    fn create_raw(&mut self) -> Result<()> {
        let physical = self.gpu.shared.physical.raw;
        let capabilities = unsafe {
            self.surface_ash
                .get_physical_device_surface_capabilities(physical, self.surface_raw)?
        };

        let formats = unsafe {
            self.surface_ash
                .get_physical_device_surface_formats(physical, self.surface_raw)?
        };
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == self.format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or(Error::Unsupported("no supported surface format"))?;

        let present_modes = unsafe {
            self.surface_ash
                .get_physical_device_surface_present_modes(physical, self.surface_raw)?
        };
        let present_mode = if present_modes.contains(&self.present_mode) {
            self.present_mode
        } else {
            // FIFO is always available.
            vk::PresentModeKHR::FIFO
        };

        let mut img_count = self.min_img_count.max(capabilities.min_image_count);
        if capabilities.max_image_count > 0 {
            img_count = img_count.min(capabilities.max_image_count);
        }
        if img_count as usize > MAX_SWAPCHAIN_IMAGES {
            return Err(Error::CapacityExceeded {
                what: "swapchain images",
                max: MAX_SWAPCHAIN_IMAGES,
            });
        }

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            capabilities.max_image_extent
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface_raw)
            .min_image_count(img_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .present_mode(present_mode)
            .clipped(true);

        self.raw = unsafe { self.raw_ash.create_swapchain(&create_info, None)? };
        self.format = surface_format.format;
        self.extent = extent;

        let raw_images = unsafe { self.raw_ash.get_swapchain_images(self.raw)? };
        self.img_count = raw_images.len() as u32;
        if let Some(images) = self.images.as_mut() {
            images.rewrap_swapchain(raw_images, self.format, extent)?;
        } else {
            self.images = Some(Images::from_swapchain(
                &self.gpu,
                raw_images,
                self.format,
                extent,
            )?);
        }
        Ok(())
    }

    pub fn images(&self) -> &Images {
        self.images.as_ref().expect("swapchain not created")
    }

    pub fn image_format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Acquires the next image, signaling `semaphores[idx]` when the image is
    /// ready for color output. The caller must check the status before using
    /// the returned index.
    pub fn acquire(&mut self, semaphores: &Semaphores, idx: usize) -> SwapchainStatus {
        let semaphore = match semaphores.raw(idx) {
            Ok(s) => s,
            Err(_) => return SwapchainStatus::Invalid,
        };
        match unsafe {
            self.raw_ash
                .acquire_next_image(self.raw, u64::MAX, semaphore, vk::Fence::null())
        } {
            // A suboptimal acquire still signals the semaphore; render the
            // frame and let the present path trigger the recreation.
            Ok((img_idx, _)) => {
                self.img_idx = img_idx;
                SwapchainStatus::Ok(img_idx)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => SwapchainStatus::NeedRecreate,
            Err(err) => {
                log::error!("swapchain acquire failed: {err}");
                SwapchainStatus::Invalid
            }
        }
    }

    /// Presents image `img_idx` on `queue`, waiting on `semaphores[idx]`.
    pub fn present(
        &mut self,
        queue: vk::Queue,
        semaphores: &Semaphores,
        idx: usize,
    ) -> SwapchainStatus {
        let semaphore = match semaphores.raw(idx) {
            Ok(s) => s,
            Err(_) => return SwapchainStatus::Invalid,
        };
        let wait_semaphores = [semaphore];
        let swapchains = [self.raw];
        let image_indices = [self.img_idx];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.raw_ash.queue_present(queue, &present_info) } {
            Ok(false) => SwapchainStatus::Ok(self.img_idx),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => SwapchainStatus::NeedRecreate,
            Err(err) => {
                log::error!("swapchain present failed: {err}");
                SwapchainStatus::Invalid
            }
        }
    }

    /// Destroys and re-creates the swapchain at the surface's current extent,
    /// reusing the `Images` handle. The device must be idle.
    pub fn recreate(&mut self) -> Result<()> {
        self.status.ensure_created("swapchain recreate")?;
        log::debug!("recreating swapchain");
        // Views before the swapchain that owns the images.
        if let Some(images) = self.images.as_mut() {
            images.release_swapchain_views();
        }
        self.destroy_raw();
        self.create_raw()?;
        log::debug!(
            "swapchain recreated at {}x{}",
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    fn destroy_raw(&mut self) {
        if self.raw != vk::SwapchainKHR::null() {
            unsafe {
                self.raw_ash.destroy_swapchain(self.raw, None);
            }
            self.raw = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::trace!("swapchain dropped");
        // Views before the swapchain that owns the images.
        self.images = None;
        self.destroy_raw();
    }
}
