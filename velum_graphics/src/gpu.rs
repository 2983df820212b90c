//! Logical device over one physical device, with its queue set, per-family
//! command pools, descriptor pool and memory allocator.

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings};
use parking_lot::Mutex;

use crate::app::{App, InstanceShared, PhysicalDevice};
use crate::error::{Error, Result};
use crate::window::Surface;
use crate::{MAX_QUEUES, MAX_QUEUE_FAMILIES};

bitflags! {
    /// Capability set requested for one device queue. A request is satisfied
    /// by any family supporting a superset of the requested capabilities.
    pub struct QueueType: u32 {
        const TRANSFER = 1 << 0;
        const GRAPHICS = 1 << 1;
        const COMPUTE  = 1 << 2;
        const PRESENT  = 1 << 3;
        const RENDER   = Self::GRAPHICS.bits | Self::COMPUTE.bits;
        const ALL      = Self::TRANSFER.bits
            | Self::GRAPHICS.bits
            | Self::COMPUTE.bits
            | Self::PRESENT.bits;
    }
}

pub(crate) struct Queues {
    pub(crate) types: Vec<QueueType>,
    pub(crate) families: Vec<u32>,
    pub(crate) raws: Vec<vk::Queue>,
    /// One command pool per distinct used family.
    pub(crate) cmd_pools: Vec<(u32, vk::CommandPool)>,
}

impl Queues {
    pub(crate) fn pool_for_family(&self, family: u32) -> vk::CommandPool {
        self.cmd_pools
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, pool)| *pool)
            .expect("no command pool for queue family")
    }

    pub(crate) fn family_of(&self, queue_idx: usize) -> Result<u32> {
        self.families
            .get(queue_idx)
            .copied()
            .ok_or(Error::InvalidIndex {
                what: "queue",
                index: queue_idx,
                count: self.families.len(),
            })
    }
}

pub(crate) struct GpuShared {
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,
    pub(crate) raw: ash::Device,
    pub(crate) queues: Queues,
    pub(crate) dset_pool: vk::DescriptorPool,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) physical: PhysicalDevice,
    pub(crate) instance: Arc<InstanceShared>,
}

impl Drop for GpuShared {
    fn drop(&mut self) {
        log::trace!("logical device dropped");
        unsafe {
            for (_, pool) in self.queues.cmd_pools.drain(..) {
                self.raw.destroy_command_pool(pool, None);
            }
            self.raw.destroy_descriptor_pool(self.dset_pool, None);
            ManuallyDrop::drop(&mut self.allocator);
            self.raw.destroy_device(None);
        }
    }
}

/// Queue requests accumulated before device creation. Consumed by
/// [`GpuConfig::create`]; requesting a queue after creation is therefore not
/// expressible.
pub struct GpuConfig {
    instance: Arc<InstanceShared>,
    physical: PhysicalDevice,
    idx: usize,
    requested: Vec<QueueType>,
}

impl App {
    /// Starts configuring the logical device over physical device `idx`.
    pub fn gpu(&self, idx: usize) -> Result<GpuConfig> {
        let physical = self.physical_device(idx)?.clone();
        Ok(GpuConfig {
            instance: self.instance.clone(),
            physical,
            idx,
            requested: Vec::new(),
        })
    }
}

impl GpuConfig {
    /// Appends a queue request; returns the queue index.
    pub fn queue(&mut self, ty: QueueType) -> Result<usize> {
        if self.requested.len() >= MAX_QUEUES {
            return Err(Error::CapacityExceeded {
                what: "queues",
                max: MAX_QUEUES,
            });
        }
        self.requested.push(ty);
        Ok(self.requested.len() - 1)
    }

    /// Selects queue families, creates the device, queues, one command pool
    /// per used family, the descriptor pool and the memory allocator.
    pub fn create(self, surface: Option<&Surface>) -> Result<Gpu> {
        if self.requested.is_empty() {
            return Err(Error::NotConfigured(
                "at least one queue must be requested before creating the GPU",
            ));
        }
        log::trace!(
            "creating GPU #{} with{} surface",
            self.idx,
            if surface.is_some() { "" } else { "out" }
        );

        let families = select_queue_families(&self.physical, &self.requested, surface)?;
        let distinct = {
            let mut d = families.clone();
            d.sort_unstable();
            d.dedup();
            d
        };
        if distinct.len() > MAX_QUEUE_FAMILIES {
            return Err(Error::CapacityExceeded {
                what: "queue families",
                max: MAX_QUEUE_FAMILIES,
            });
        }

        // One index per queue within its family, capped by the family's
        // queue count (extra requests share the family's last queue).
        let mut indices = vec![0u32; families.len()];
        for family in &distinct {
            let capacity = self.physical.queue_families[*family as usize]
                .properties
                .queue_count;
            let mut next = 0u32;
            for (i, f) in families.iter().enumerate() {
                if f == family {
                    indices[i] = next.min(capacity - 1);
                    next += 1;
                }
            }
        }

        let priorities = [1.0f32; MAX_QUEUES];
        let queue_create_infos: Vec<_> = distinct
            .iter()
            .map(|family| {
                let capacity = self.physical.queue_families[*family as usize]
                    .properties
                    .queue_count;
                let used = families.iter().filter(|f| *f == family).count() as u32;
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities[..used.min(capacity) as usize])
            })
            .collect();

        let mut extension_names: Vec<CString> = Vec::new();
        if surface.is_some() {
            extension_names.push(CString::new("VK_KHR_swapchain").unwrap());
        }
        let extension_ptrs: Vec<*const i8> =
            extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let supported =
            unsafe { self.instance.raw.get_physical_device_features(self.physical.raw) };
        let features = vk::PhysicalDeviceFeatures::default()
            .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);

        let raw = unsafe {
            self.instance
                .raw
                .create_device(self.physical.raw, &device_create_info, None)?
        };

        let raws: Vec<vk::Queue> = families
            .iter()
            .zip(&indices)
            .map(|(family, index)| unsafe { raw.get_device_queue(*family, *index) })
            .collect();

        let cmd_pools = distinct
            .iter()
            .map(|family| {
                let info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(*family)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
                let pool = unsafe { raw.create_command_pool(&info, None)? };
                Ok((*family, pool))
            })
            .collect::<Result<Vec<_>>>()?;

        let dset_pool = create_descriptor_pool(&raw)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: self.instance.raw.clone(),
            device: raw.clone(),
            physical_device: self.physical.raw,
            debug_settings: AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })?;

        log::trace!("GPU #{} created ({})", self.idx, self.physical.name);

        Ok(Gpu {
            shared: Arc::new(GpuShared {
                allocator: ManuallyDrop::new(Mutex::new(allocator)),
                raw,
                queues: Queues {
                    types: self.requested,
                    families,
                    raws,
                    cmd_pools,
                },
                dset_pool,
                memory_properties: self.physical.memory_properties,
                physical: self.physical,
                instance: self.instance,
            }),
        })
    }
}

/// Created logical device. Cheap to clone; all owned resources keep the
/// underlying device alive through this handle.
#[derive(Clone)]
pub struct Gpu {
    pub(crate) shared: Arc<GpuShared>,
}

impl Gpu {
    pub fn queue_count(&self) -> usize {
        self.shared.queues.raws.len()
    }

    pub fn queue_type(&self, queue_idx: usize) -> Result<QueueType> {
        self.shared
            .queues
            .types
            .get(queue_idx)
            .copied()
            .ok_or(Error::InvalidIndex {
                what: "queue",
                index: queue_idx,
                count: self.queue_count(),
            })
    }

    /// First queue whose requested type contains `ty`.
    pub fn find_queue(&self, ty: QueueType) -> Option<usize> {
        self.shared.queues.types.iter().position(|t| t.contains(ty))
    }

    pub(crate) fn raw_queue(&self, queue_idx: usize) -> Result<vk::Queue> {
        self.shared
            .queues
            .raws
            .get(queue_idx)
            .copied()
            .ok_or(Error::InvalidIndex {
                what: "queue",
                index: queue_idx,
                count: self.queue_count(),
            })
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.shared.raw.device_wait_idle()? };
        Ok(())
    }

    pub fn queue_wait_idle(&self, queue_idx: usize) -> Result<()> {
        let queue = self.raw_queue(queue_idx)?;
        unsafe { self.shared.raw.queue_wait_idle(queue)? };
        Ok(())
    }
}

fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
    const COUNT_PER_TYPE: u32 = 128;
    let pool_sizes = [
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(COUNT_PER_TYPE),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(COUNT_PER_TYPE),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(COUNT_PER_TYPE),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(COUNT_PER_TYPE),
        vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(COUNT_PER_TYPE),
    ];
    let info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(256)
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .pool_sizes(&pool_sizes);
    Ok(unsafe { device.create_descriptor_pool(&info, None)? })
}

/// Picks a queue family for each request. A request may map to a family that
/// supports a superset of the requested capabilities; `PRESENT` honors
/// surface support when a surface is given.
fn select_queue_families(
    physical: &PhysicalDevice,
    requested: &[QueueType],
    surface: Option<&Surface>,
) -> Result<Vec<u32>> {
    requested
        .iter()
        .map(|ty| {
            physical
                .queue_families
                .iter()
                .filter(|family| family.properties.queue_count > 0)
                .find(|family| {
                    if ty.contains(QueueType::GRAPHICS) && !family.supports_graphics() {
                        return false;
                    }
                    if ty.contains(QueueType::COMPUTE) && !family.supports_compute() {
                        return false;
                    }
                    if ty.contains(QueueType::TRANSFER) && !family.supports_transfer() {
                        return false;
                    }
                    if ty.contains(QueueType::PRESENT) {
                        match surface {
                            Some(surface) => surface
                                .supports_family(physical.raw, family.index)
                                .unwrap_or(false),
                            None => false,
                        }
                    } else {
                        true
                    }
                })
                .map(|family| family.index)
                .ok_or(Error::Unsupported("no queue family matches the request"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_type_unions() {
        assert!(QueueType::RENDER.contains(QueueType::GRAPHICS));
        assert!(QueueType::RENDER.contains(QueueType::COMPUTE));
        assert!(!QueueType::RENDER.contains(QueueType::PRESENT));
        assert!(QueueType::ALL.contains(QueueType::RENDER | QueueType::PRESENT));
    }
}
