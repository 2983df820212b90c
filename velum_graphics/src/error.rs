use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No compatible device, present mode, memory type or queue family.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// `create()` called before a required setter.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Resource-defining setter invoked after `create()`.
    #[error("already created: {0}")]
    AlreadyCreated(&'static str),

    #[error("invalid {what} index {index} (count {count})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("capacity exceeded for {what} (max {max})")]
    CapacityExceeded { what: &'static str, max: usize },

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("device lost")]
    DeviceLost,

    #[error("vulkan error: {0}")]
    Vulkan(vk::Result),

    #[error("allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<vk::Result> for Error {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            other => Error::Vulkan(other),
        }
    }
}

impl Error {
    /// Whether the frame loop may recover from this error by recreating the
    /// swapchain instead of shutting down.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
                | Error::Vulkan(vk::Result::SUBOPTIMAL_KHR)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_maps_to_its_own_kind() {
        let err: Error = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, Error::DeviceLost));
        let err: Error = vk::Result::ERROR_OUT_OF_HOST_MEMORY.into();
        assert!(matches!(err, Error::Vulkan(_)));
    }

    #[test]
    fn out_of_date_is_transient() {
        let err: Error = vk::Result::ERROR_OUT_OF_DATE_KHR.into();
        assert!(err.is_transient());
        assert!(!Error::DeviceLost.is_transient());
    }
}
