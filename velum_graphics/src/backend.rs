//! Windowing backend seam.
//!
//! The core never calls into a windowing library directly; everything goes
//! through the [`Backend`] trait. A GLFW/winit implementation lives outside
//! this crate and feeds raw window/display handles to `ash-window`. The
//! built-in [`Headless`] backend supports surface-less (offscreen) work and
//! is what the test suite runs against.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use nalgebra::Vector2;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{Error, Result};
use crate::event::{KeyCode, KeyModifiers, MouseButton};

/// Opaque identifier of a native window, owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendWindow(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct WindowSize {
    pub screen_width: u32,
    pub screen_height: u32,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
}

/// Raw input notifications polled from the backend, before any state
/// derivation (drag/click detection happens in the core).
#[derive(Debug, Clone)]
pub enum BackendEvent {
    MouseButton {
        button: MouseButton,
        pressed: bool,
        modifiers: KeyModifiers,
    },
    CursorPos(Vector2<f64>),
    Wheel(Vector2<f64>),
    Key {
        key: KeyCode,
        pressed: bool,
        modifiers: KeyModifiers,
    },
    Resized {
        width: u32,
        height: u32,
    },
    CloseRequested,
}

pub trait Backend {
    /// Instance extensions this backend needs (e.g. surface extensions).
    fn required_extensions(&self) -> Vec<&'static CStr>;

    /// Creates a native window and returns its raw handles for surface
    /// creation. The surface itself is created by the core via `ash-window`.
    fn create_window(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(BackendWindow, RawWindowHandle, RawDisplayHandle)>;

    fn destroy_window(&mut self, window: BackendWindow);

    fn window_size(&self, window: BackendWindow) -> WindowSize;

    /// Drains pending input events for the given window.
    fn poll_events(&mut self, window: BackendWindow) -> Vec<BackendEvent>;

    fn should_close(&self, window: BackendWindow) -> bool;
}

pub(crate) type SharedBackend = Arc<Mutex<Box<dyn Backend + Send>>>;

/// Backend with no windowing system. Surfaceless: compute, offscreen
/// rendering and readback all work; window creation fails.
#[derive(Default)]
pub struct Headless;

impl Backend for Headless {
    fn required_extensions(&self) -> Vec<&'static CStr> {
        Vec::new()
    }

    fn create_window(
        &mut self,
        _width: u32,
        _height: u32,
    ) -> Result<(BackendWindow, RawWindowHandle, RawDisplayHandle)> {
        Err(Error::Unsupported("headless backend has no windows"))
    }

    fn destroy_window(&mut self, _window: BackendWindow) {}

    fn window_size(&self, _window: BackendWindow) -> WindowSize {
        WindowSize {
            screen_width: 0,
            screen_height: 0,
            framebuffer_width: 0,
            framebuffer_height: 0,
        }
    }

    fn poll_events(&mut self, _window: BackendWindow) -> Vec<BackendEvent> {
        Vec::new()
    }

    fn should_close(&self, _window: BackendWindow) -> bool {
        false
    }
}

/// GUI overlay seam; the overlay implementation lives outside this crate.
/// The canvas guarantees a dedicated overlay renderpass, framebuffers and
/// command-buffer set when the overlay flag is set.
pub trait Overlay {
    fn init(&mut self, gpu: &crate::gpu::Gpu, renderpass: vk::RenderPass) -> Result<()>;
    fn new_frame(&mut self);
    fn render(&mut self, cmd_buf: vk::CommandBuffer) -> Result<()>;
    fn shutdown(&mut self);
}
