/*! Lightweight GPU abstraction layer over Vulkan: explicit devices, queues,
buffers, images, bindings and pipelines, with a canvas frame loop driving
per-frame acquisition, recording, submission and presentation.
*/

pub mod app;
pub mod backend;
pub mod binding;
pub mod canvas;
pub mod command;
pub mod error;
pub mod event;
pub mod gpu;
pub mod object;
pub mod pipeline;
pub mod renderpass;
pub mod resource;
pub mod sync;
pub mod visual;
pub mod window;

/// External dependencies exposed outside of the current crate.
pub use ash::{self, vk};
pub use gpu_allocator;
pub use nalgebra;
pub use raw_window_handle;

pub use app::{App, PhysicalDevice};
pub use backend::{Backend, BackendEvent, BackendWindow, Headless, Overlay, WindowSize};
pub use binding::Bindings;
pub use canvas::{Canvas, CanvasFlags, CanvasSignal, CanvasStatus, DEFAULT_BACKGROUND};
pub use command::Commands;
pub use error::{Error, Result};
pub use event::{
    Action, Event, EventKind, KeyCode, KeyModifiers, Keyboard, Mouse, MouseButton, MouseState,
    PrivateEvent, PrivateEventKind,
};
pub use gpu::{Gpu, GpuConfig, QueueType};
pub use object::ObjectStatus;
pub use pipeline::{load_shader_module, Compute, Graphics, ShaderModule};
pub use renderpass::{AttachmentKind, Framebuffers, Renderpass};
pub use resource::{Barrier, Buffer, BufferRegions, Images, Sampler, TextureAxis};
pub use sync::{Fences, Semaphores, Submit};
pub use visual::{
    BakeOutcome, CopyType, PropType, SourceKind, SourceOrigin, SourceType, Visual,
};
pub use window::{Surface, Swapchain, SwapchainStatus, Window};

/// Fixed maxima; exceeding any of them is a [`Error::CapacityExceeded`].
pub const MAX_GPUS: usize = 16;
pub const MAX_WINDOWS: usize = 16;
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
pub const MAX_QUEUES: usize = 16;
pub const MAX_QUEUE_FAMILIES: usize = 8;
pub const MAX_BINDINGS_SIZE: usize = 16;
pub const MAX_BUFFER_REGIONS_PER_SET: usize = 16;
pub const MAX_COMMAND_BUFFERS_PER_SET: usize = 16;
pub const MAX_EVENT_CALLBACKS: usize = 32;
pub const MAX_FIFO_CAPACITY: usize = 64;
