//! Process-wide graphics context: instance, validation messenger and the
//! table of discovered physical devices.

use std::ffi::{c_void, CStr, CString};
use std::sync::Arc;

use ash::ext::debug_utils;
use ash::vk;
use parking_lot::Mutex;

use crate::backend::{Backend, SharedBackend};
use crate::error::{Error, Result};
use crate::MAX_GPUS;

pub(crate) struct InstanceShared {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    debug_utils: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceShared {
    fn new(required_extensions: &[&'static CStr], validation: bool) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| Error::Backend(format!("failed to load Vulkan loader: {e}")))?;

        let app_name = CString::new("velum").unwrap();
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .api_version(vk::API_VERSION_1_2);

        let mut extension_names: Vec<*const i8> =
            required_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if validation {
            extension_names.push(debug_utils::NAME.as_ptr());
        }

        let layer_strings = if validation {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_names: Vec<*const i8> = layer_strings.iter().map(|s| s.as_ptr()).collect();

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let raw = unsafe { entry.create_instance(&instance_info, None)? };

        let debug = if validation {
            let debug_utils_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_utils_callback));
            let instance = debug_utils::Instance::new(&entry, &raw);
            match unsafe { instance.create_debug_utils_messenger(&debug_utils_info, None) } {
                Ok(messenger) => Some((instance, messenger)),
                Err(err) => {
                    log::warn!("validation requested but messenger creation failed: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            raw,
            debug_utils: debug,
        })
    }
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        log::trace!("instance dropped");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let severity = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => "[Warning]",
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => "[Error]",
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => "[Info]",
        _ => "[Verbose]",
    };
    let types = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[General]",
    };
    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::debug!("[VK]{severity}{types} {message:?}");
    vk::FALSE
}

#[derive(Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn supports_graphics(&self) -> bool {
        self.properties
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_transfer(&self) -> bool {
        // Graphics and compute families implicitly support transfer.
        self.properties.queue_flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
    }
}

/// Descriptor of one discovered physical device.
#[derive(Clone)]
pub struct PhysicalDevice {
    pub(crate) raw: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) queue_families: Vec<QueueFamily>,
}

impl PhysicalDevice {
    fn discover(instance: &ash::Instance, raw: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(raw) };
        let name = unsafe {
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("unknown")
                .to_owned()
        };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(raw) };
        let queue_families = unsafe {
            instance.get_physical_device_queue_family_properties(raw)
        }
        .into_iter()
        .enumerate()
        .map(|(index, properties)| QueueFamily {
            index: index as u32,
            properties,
        })
        .collect();

        Self {
            raw,
            name,
            device_type: properties.device_type,
            memory_properties,
            queue_families,
        }
    }
}

/// Owns the instance and the discovered GPU table; windows and GPUs are
/// created from it and own their backing state themselves.
pub struct App {
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) backend: SharedBackend,
    gpus: Vec<PhysicalDevice>,
}

impl App {
    pub fn new(backend: Box<dyn Backend + Send>) -> Result<Self> {
        Self::with_validation(backend, cfg!(debug_assertions))
    }

    pub fn with_validation(backend: Box<dyn Backend + Send>, validation: bool) -> Result<Self> {
        let extensions = backend.required_extensions();
        let instance = Arc::new(InstanceShared::new(&extensions, validation)?);

        let physical_devices = unsafe { instance.raw.enumerate_physical_devices()? };
        if physical_devices.is_empty() {
            return Err(Error::Unsupported("no compatible Vulkan device found"));
        }
        let mut gpus: Vec<PhysicalDevice> = physical_devices
            .into_iter()
            .take(MAX_GPUS)
            .map(|raw| PhysicalDevice::discover(&instance.raw, raw))
            .collect();
        // Discrete GPUs first, so that index 0 is the sensible default.
        gpus.sort_by_key(|gpu| match gpu.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            _ => 2,
        });
        for (idx, gpu) in gpus.iter().enumerate() {
            log::info!("found device #{idx}: {}", gpu.name);
        }

        Ok(Self {
            instance,
            backend: Arc::new(Mutex::new(backend)),
            gpus,
        })
    }

    pub fn gpu_count(&self) -> usize {
        self.gpus.len()
    }

    pub fn physical_device(&self, idx: usize) -> Result<&PhysicalDevice> {
        self.gpus.get(idx).ok_or(Error::InvalidIndex {
            what: "gpu",
            index: idx,
            count: self.gpus.len(),
        })
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::trace!("app dropped");
    }
}
