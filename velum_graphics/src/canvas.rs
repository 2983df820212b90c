//! Canvas: swapchain-backed rendering surface driving the per-frame
//! acquire / record / submit / present state machine, the resize and refill
//! protocols, and both event paths.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use ash::vk;
use bitflags::bitflags;

use crate::backend::{BackendEvent, SharedBackend};
use crate::command::Commands;
use crate::error::{Error, Result};
use crate::event::{
    private_dispatch_order, Event, EventCallback, EventDispatcher, EventFifo, EventKind,
    Keyboard, KeyCode, Mouse, PrivateEvent, PrivateEventKind,
};
use crate::gpu::{Gpu, QueueType};
use crate::renderpass::{AttachmentKind, Framebuffers, Renderpass};
use crate::resource::{Barrier, Images};
use crate::sync::{Fences, Semaphores, Submit};
use crate::window::{Swapchain, SwapchainStatus, Window};
use crate::{MAX_FRAMES_IN_FLIGHT, MAX_SWAPCHAIN_IMAGES};

pub const DEFAULT_BACKGROUND: [f32; 4] = [0.0, 0.03, 0.07, 1.0];
pub const MIN_SWAPCHAIN_IMAGE_COUNT: u32 = 3;
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

bitflags! {
    pub struct CanvasFlags: u32 {
        const OVERLAY = 0x0001;
    }
}

/// Canvas status; also published atomically for the event thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CanvasStatus {
    Init = 0,
    Created = 1,
    NeedRefill = 2,
    NeedRecreate = 3,
    NeedDestroy = 4,
    Destroyed = 5,
}

impl CanvasStatus {
    fn from_u8(value: u8) -> CanvasStatus {
        match value {
            0 => CanvasStatus::Init,
            1 => CanvasStatus::Created,
            2 => CanvasStatus::NeedRefill,
            3 => CanvasStatus::NeedRecreate,
            4 => CanvasStatus::NeedDestroy,
            _ => CanvasStatus::Destroyed,
        }
    }
}

/// Cloneable, thread-safe handle used to signal the canvas from user
/// callbacks (including the event thread).
#[derive(Clone)]
pub struct CanvasSignal {
    next_status: Arc<AtomicU8>,
    refill_requested: Arc<AtomicBool>,
}

impl CanvasSignal {
    pub fn request_close(&self) {
        self.next_status
            .store(CanvasStatus::NeedDestroy as u8, Ordering::SeqCst);
    }

    pub fn request_refill(&self) {
        self.refill_requested.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillStatus {
    None,
    Requested,
    Processing,
}

/// Bookkeeping for a pending command-buffer refill: once requested, each
/// swapchain image's buffer is re-recorded exactly once, as its image comes
/// out of flight; when all are done the status returns to `None`.
pub(crate) struct PendingRefill {
    pub(crate) status: RefillStatus,
    completed: [bool; MAX_SWAPCHAIN_IMAGES],
    img_count: usize,
}

impl PendingRefill {
    pub(crate) fn new(img_count: usize) -> PendingRefill {
        PendingRefill {
            status: RefillStatus::None,
            completed: [false; MAX_SWAPCHAIN_IMAGES],
            img_count,
        }
    }

    pub(crate) fn request(&mut self) {
        self.status = RefillStatus::Requested;
        self.completed = [false; MAX_SWAPCHAIN_IMAGES];
    }

    /// Whether image `img_idx` still needs a refill this generation.
    pub(crate) fn needs(&self, img_idx: usize) -> bool {
        self.status != RefillStatus::None && !self.completed[img_idx]
    }

    /// Marks image `img_idx` refilled; returns true when the generation is
    /// complete.
    pub(crate) fn mark(&mut self, img_idx: usize) -> bool {
        self.status = RefillStatus::Processing;
        self.completed[img_idx] = true;
        if self.completed[..self.img_count].iter().all(|c| *c) {
            self.status = RefillStatus::None;
            true
        } else {
            false
        }
    }

    pub(crate) fn resize(&mut self, img_count: usize) {
        self.img_count = img_count;
        self.completed = [false; MAX_SWAPCHAIN_IMAGES];
    }
}

/// Back-fence table: per swapchain image, the in-flight frame currently
/// rendering into it. Guarantees an image is never reused before its prior
/// frame completed, even when frames-in-flight < swapchain image count.
pub(crate) struct BackFences {
    owner: [Option<usize>; MAX_SWAPCHAIN_IMAGES],
}

impl BackFences {
    pub(crate) fn new() -> BackFences {
        BackFences {
            owner: [None; MAX_SWAPCHAIN_IMAGES],
        }
    }

    /// Returns the frame-fence index that must be waited on before recording
    /// into `img_idx`, and records `cur_frame` as the image's new owner.
    pub(crate) fn acquire(&mut self, img_idx: usize, cur_frame: usize) -> Option<usize> {
        let previous = self.owner[img_idx];
        self.owner[img_idx] = Some(cur_frame);
        previous
    }

    pub(crate) fn clear(&mut self) {
        self.owner = [None; MAX_SWAPCHAIN_IMAGES];
    }
}

struct PrivateRegistration {
    kind: PrivateEventKind,
    param: f64,
    cb: Box<dyn FnMut(&mut Canvas, &PrivateEvent)>,
}

struct TimerState {
    interval: f64,
    next_fire: f64,
    idx: u64,
}

struct Clock {
    start: Instant,
    last_frame: Instant,
    interval: f64,
    fps: f64,
    fps_counter: u64,
    fps_window_start: Instant,
}

impl Clock {
    fn new() -> Clock {
        let now = Instant::now();
        Clock {
            start: now,
            last_frame: now,
            interval: 0.0,
            fps: 0.0,
            fps_counter: 0,
            fps_window_start: now,
        }
    }

    fn time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.interval = now.duration_since(self.last_frame).as_secs_f64();
        self.last_frame = now;
        self.fps_counter += 1;
        if self.fps_counter % 100 == 0 {
            let window = now.duration_since(self.fps_window_start).as_secs_f64();
            if window > 0.0 {
                self.fps = 100.0 / window;
            }
            self.fps_window_start = now;
        }
    }
}

pub struct Canvas {
    gpu: Gpu,
    backend: SharedBackend,
    window: Window,

    // Drop order is leaves-first: framebuffers before renderpasses before
    // images before the swapchain before the window's surface.
    framebuffers: Framebuffers,
    overlay_framebuffers: Option<Framebuffers>,
    renderpass: Renderpass,
    overlay_renderpass: Option<Renderpass>,
    depth: Images,
    swapchain: Swapchain,

    cmds_transfer: Commands,
    cmds_render: Commands,
    overlay_cmds: Option<Commands>,

    sem_img_available: Semaphores,
    sem_render_finished: Semaphores,
    fences_render_finished: Fences,
    back_fences: BackFences,

    render_queue: usize,
    present_queue: usize,
    transfer_queue: usize,

    refills: PendingRefill,
    refill_requested: Arc<AtomicBool>,

    cur_status: Arc<AtomicU8>,
    next_status: Arc<AtomicU8>,

    cur_frame: usize,
    frame_idx: u64,
    clock: Clock,
    paused: bool,
    pending_recreate: bool,

    fifo: Arc<EventFifo>,
    dispatcher: Arc<EventDispatcher>,
    event_thread: Option<JoinHandle<()>>,

    private_callbacks: Vec<PrivateRegistration>,
    pending_private: Vec<PrivateRegistration>,
    dispatching: bool,
    timers: Vec<TimerState>,

    pub(crate) mouse: Mouse,
    pub(crate) keyboard: Keyboard,
    close_on_esc: bool,
}

impl Canvas {
    pub fn new(gpu: &Gpu, window: Window, flags: CanvasFlags) -> Result<Canvas> {
        log::trace!("creating canvas");
        let render_queue = gpu
            .find_queue(QueueType::RENDER)
            .or_else(|| gpu.find_queue(QueueType::GRAPHICS))
            .ok_or(Error::NotConfigured("canvas needs a render queue"))?;
        let present_queue = gpu.find_queue(QueueType::PRESENT).unwrap_or(render_queue);
        let transfer_queue = gpu.find_queue(QueueType::TRANSFER).unwrap_or(render_queue);

        let mut swapchain = Swapchain::new(gpu, &window, MIN_SWAPCHAIN_IMAGE_COUNT);
        swapchain.create()?;
        let img_count = swapchain.img_count as usize;
        if MAX_FRAMES_IN_FLIGHT > img_count {
            return Err(Error::Unsupported(
                "swapchain has fewer images than frames in flight",
            ));
        }

        let extent = swapchain.extent();
        let depth = Self::make_depth(gpu, extent)?;

        let overlay = flags.contains(CanvasFlags::OVERLAY);
        let mut renderpass =
            Self::make_default_renderpass(gpu, swapchain.image_format(), overlay)?;
        renderpass.create()?;

        let mut framebuffers = Framebuffers::new(gpu);
        framebuffers.attachment(0, swapchain.images())?;
        framebuffers.attachment(1, &depth)?;
        framebuffers.create(&renderpass)?;

        let (overlay_renderpass, overlay_framebuffers, overlay_cmds) = if overlay {
            let mut rp = Self::make_overlay_renderpass(gpu, swapchain.image_format())?;
            rp.create()?;
            let mut fb = Framebuffers::new(gpu);
            fb.attachment(0, swapchain.images())?;
            fb.create(&rp)?;
            let cmds = Commands::new(gpu, render_queue, img_count)?;
            (Some(rp), Some(fb), Some(cmds))
        } else {
            (None, None, None)
        };

        let cmds_transfer = Commands::new(gpu, transfer_queue, img_count)?;
        let cmds_render = Commands::new(gpu, render_queue, img_count)?;

        let sem_img_available = Semaphores::new(gpu, MAX_FRAMES_IN_FLIGHT)?;
        let sem_render_finished = Semaphores::new(gpu, MAX_FRAMES_IN_FLIGHT)?;
        let fences_render_finished = Fences::new(gpu, MAX_FRAMES_IN_FLIGHT, true)?;

        let fifo = Arc::new(EventFifo::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let event_thread = Some(Self::spawn_event_thread(fifo.clone(), dispatcher.clone()));

        let mut canvas = Canvas {
            gpu: gpu.clone(),
            backend: window.shared_backend(),
            window,
            framebuffers,
            overlay_framebuffers,
            renderpass,
            overlay_renderpass,
            depth,
            swapchain,
            cmds_transfer,
            cmds_render,
            overlay_cmds,
            sem_img_available,
            sem_render_finished,
            fences_render_finished,
            back_fences: BackFences::new(),
            render_queue,
            present_queue,
            transfer_queue,
            refills: PendingRefill::new(img_count),
            refill_requested: Arc::new(AtomicBool::new(false)),
            cur_status: Arc::new(AtomicU8::new(CanvasStatus::Init as u8)),
            next_status: Arc::new(AtomicU8::new(CanvasStatus::Created as u8)),
            cur_frame: 0,
            frame_idx: 0,
            clock: Clock::new(),
            paused: false,
            pending_recreate: false,
            fifo,
            dispatcher,
            event_thread,
            private_callbacks: Vec::new(),
            pending_private: Vec::new(),
            dispatching: false,
            timers: Vec::new(),
            mouse: Mouse::new(),
            keyboard: Keyboard::new(),
            close_on_esc: true,
        };

        // Initial blank recording for every swapchain image.
        for img_idx in 0..img_count {
            canvas.default_refill(img_idx)?;
        }

        canvas.set_status(CanvasStatus::Created);
        log::trace!("canvas created with {img_count} swapchain images");
        Ok(canvas)
    }

    fn spawn_event_thread(
        fifo: Arc<EventFifo>,
        dispatcher: Arc<EventDispatcher>,
    ) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("velum-events".into())
            .spawn(move || {
                while let Some(event) = fifo.dequeue(true) {
                    dispatcher.dispatch(&event);
                }
                log::trace!("event thread exiting");
            })
            .expect("failed to spawn event thread")
    }

    fn make_depth(gpu: &Gpu, extent: vk::Extent2D) -> Result<Images> {
        let mut depth = Images::new(gpu, vk::ImageType::TYPE_2D, 1);
        depth.format(DEPTH_FORMAT)?;
        depth.size(extent.width, extent.height, 1)?;
        depth.usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)?;
        depth.create()?;
        Ok(depth)
    }

    fn make_default_renderpass(
        gpu: &Gpu,
        format: vk::Format,
        overlay: bool,
    ) -> Result<Renderpass> {
        let final_layout = if overlay {
            // The overlay pass renders on top and transitions to present.
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        };
        let mut renderpass = Renderpass::new(gpu);
        renderpass.clear(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: DEFAULT_BACKGROUND,
            },
        });
        renderpass.clear(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
        renderpass.attachment(
            0,
            AttachmentKind::Color,
            format,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;
        renderpass.attachment_layout(0, vk::ImageLayout::UNDEFINED, final_layout)?;
        renderpass.attachment_ops(
            0,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
        )?;
        renderpass.attachment(
            1,
            AttachmentKind::Depth,
            DEPTH_FORMAT,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;
        renderpass.attachment_layout(
            1,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )?;
        renderpass.attachment_ops(
            1,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::DONT_CARE,
        )?;
        renderpass.subpass(0, &[0, 1])?;
        renderpass.dependency(0, vk::SUBPASS_EXTERNAL, 0)?;
        renderpass.dependency_stages(
            0,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )?;
        renderpass.dependency_access(
            0,
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )?;
        Ok(renderpass)
    }

    fn make_overlay_renderpass(gpu: &Gpu, format: vk::Format) -> Result<Renderpass> {
        let mut renderpass = Renderpass::new(gpu);
        renderpass.attachment(
            0,
            AttachmentKind::Color,
            format,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;
        renderpass.attachment_layout(
            0,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        renderpass.attachment_ops(
            0,
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::STORE,
        )?;
        renderpass.subpass(0, &[0])?;
        renderpass.dependency(0, vk::SUBPASS_EXTERNAL, 0)?;
        renderpass.dependency_stages(
            0,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )?;
        renderpass.dependency_access(
            0,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )?;
        Ok(renderpass)
    }

    // ---- accessors -------------------------------------------------------

    pub fn gpu(&self) -> &Gpu {
        &self.gpu
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn renderpass(&self) -> &Renderpass {
        &self.renderpass
    }

    pub fn framebuffers(&self) -> &Framebuffers {
        &self.framebuffers
    }

    pub fn render_commands(&self) -> &Commands {
        &self.cmds_render
    }

    pub fn transfer_commands(&self) -> &Commands {
        &self.cmds_transfer
    }

    pub fn img_count(&self) -> usize {
        self.swapchain.img_count as usize
    }

    pub fn frame_idx(&self) -> u64 {
        self.frame_idx
    }

    pub fn fps(&self) -> f64 {
        self.clock.fps
    }

    pub fn mouse(&self) -> &Mouse {
        &self.mouse
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    pub fn status(&self) -> CanvasStatus {
        CanvasStatus::from_u8(self.cur_status.load(Ordering::SeqCst))
    }

    pub fn close_on_esc(&mut self, value: bool) {
        self.close_on_esc = value;
    }

    /// Thread-safe handle for close/refill requests from callbacks.
    pub fn signal(&self) -> CanvasSignal {
        CanvasSignal {
            next_status: self.next_status.clone(),
            refill_requested: self.refill_requested.clone(),
        }
    }

    fn set_status(&self, status: CanvasStatus) {
        self.cur_status.store(status as u8, Ordering::SeqCst);
    }

    // ---- configuration ---------------------------------------------------

    /// Updates the background clear color and schedules a refill.
    pub fn clear_color(&mut self, color: [f32; 4]) -> Result<()> {
        self.renderpass.update_clear(
            0,
            vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        )?;
        self.to_refill();
        Ok(())
    }

    /// Registers a public event callback, dispatched on the event thread.
    pub fn on_event(
        &mut self,
        kind: EventKind,
        cb: impl FnMut(&Event) + Send + 'static,
    ) -> Result<()> {
        self.dispatcher.register(kind, Box::new(cb) as EventCallback)
    }

    /// Registers a private event callback, dispatched synchronously on the
    /// loop thread. Callbacks with `param > 0` run in a second pass, after
    /// all zero-param callbacks of the same event.
    pub fn on_private(
        &mut self,
        kind: PrivateEventKind,
        param: f64,
        cb: impl FnMut(&mut Canvas, &PrivateEvent) + 'static,
    ) {
        let registration = PrivateRegistration {
            kind,
            param,
            cb: Box::new(cb),
        };
        if self.dispatching {
            self.pending_private.push(registration);
        } else {
            self.private_callbacks.push(registration);
        }
    }

    /// Adds a repeating timer; `Timer` private events fire every
    /// `interval` seconds, just after the frame event.
    pub fn add_timer(&mut self, interval: f64) {
        self.timers.push(TimerState {
            interval,
            next_fire: self.clock.time() + interval,
            idx: 0,
        });
    }

    /// Requests a re-recording of all render command buffers.
    pub fn to_refill(&mut self) {
        self.refill_requested.store(true, Ordering::SeqCst);
    }

    pub fn close(&mut self) {
        self.next_status
            .store(CanvasStatus::NeedDestroy as u8, Ordering::SeqCst);
    }

    // ---- event plumbing --------------------------------------------------

    fn emit_private(&mut self, event: PrivateEvent) {
        let mut callbacks = std::mem::take(&mut self.private_callbacks);
        let meta: Vec<(PrivateEventKind, f64)> =
            callbacks.iter().map(|r| (r.kind, r.param)).collect();
        self.dispatching = true;
        for idx in private_dispatch_order(&meta, event.kind()) {
            (callbacks[idx].cb)(self, &event);
        }
        self.dispatching = false;
        callbacks.append(&mut self.pending_private);
        self.private_callbacks = callbacks;
    }

    fn enqueue(&self, event: Event) {
        self.fifo.enqueue(event);
    }

    fn poll_backend(&mut self) {
        let events = self
            .backend
            .lock()
            .poll_events(self.window.backend_window);
        let time = self.clock.time();
        for event in events {
            match event {
                BackendEvent::MouseButton {
                    button,
                    pressed,
                    modifiers,
                } => {
                    let action = if pressed {
                        crate::event::Action::Press
                    } else {
                        crate::event::Action::Release
                    };
                    for ev in self.mouse.on_button(button, action, modifiers, time) {
                        self.enqueue(ev);
                    }
                }
                BackendEvent::CursorPos(pos) => {
                    for ev in self.mouse.on_move(pos, time) {
                        self.enqueue(ev);
                    }
                }
                BackendEvent::Wheel(dir) => {
                    for ev in self.mouse.on_wheel(dir, time) {
                        self.enqueue(ev);
                    }
                }
                BackendEvent::Key {
                    key,
                    pressed,
                    modifiers,
                } => {
                    let action = if pressed {
                        crate::event::Action::Press
                    } else {
                        crate::event::Action::Release
                    };
                    if self.close_on_esc && pressed && key == KeyCode::Escape {
                        self.close();
                    }
                    for ev in self.keyboard.on_key(action, key, modifiers, time) {
                        self.enqueue(ev);
                    }
                }
                BackendEvent::Resized { .. } => {
                    self.pending_recreate = true;
                }
                BackendEvent::CloseRequested => {
                    self.close();
                }
            }
        }
        if self.window.should_close() {
            self.close();
        }
    }

    // ---- refill ----------------------------------------------------------

    fn has_refill_callbacks(&self) -> bool {
        self.private_callbacks
            .iter()
            .any(|r| r.kind == PrivateEventKind::Refill)
    }

    /// Re-records the command buffer of one swapchain image, through the
    /// registered refill callbacks or the default blank recording.
    fn refill_image(&mut self, img_idx: usize) -> Result<()> {
        self.cmds_render.reset(img_idx)?;
        if self.has_refill_callbacks() {
            self.emit_private(PrivateEvent::Refill { img_idx });
        } else {
            self.default_refill(img_idx)?;
        }
        Ok(())
    }

    /// Blank recording: clears the attachments and does nothing else.
    fn default_refill(&self, img_idx: usize) -> Result<()> {
        let extent = self.framebuffers.extent();
        self.cmds_render.begin(img_idx)?;
        self.cmds_render
            .begin_renderpass(img_idx, &self.renderpass, &self.framebuffers)?;
        self.cmds_render.viewport(
            img_idx,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        )?;
        self.cmds_render.end_renderpass(img_idx)?;
        self.cmds_render.end(img_idx)
    }

    // ---- resize ----------------------------------------------------------

    /// Swapchain recreation protocol: device idle, re-query size, destroy
    /// framebuffers and depth, recreate swapchain and dependents, refill
    /// everything, emit the resize event.
    fn recreate(&mut self) -> Result<()> {
        self.gpu.wait_idle()?;

        let size = self.window.size();
        if size.framebuffer_width == 0 || size.framebuffer_height == 0 {
            // Minimized: stall without recreating until the backend reports a
            // non-zero drawable area.
            self.paused = true;
            return Ok(());
        }
        self.paused = false;
        self.set_status(CanvasStatus::NeedRecreate);

        self.framebuffers.destroy();
        if let Some(fb) = self.overlay_framebuffers.as_mut() {
            fb.destroy();
        }
        self.swapchain.recreate()?;
        let extent = self.swapchain.extent();
        self.depth = Self::make_depth(&self.gpu, extent)?;

        self.framebuffers.attachment(0, self.swapchain.images())?;
        self.framebuffers.attachment(1, &self.depth)?;
        self.framebuffers.create(&self.renderpass)?;
        if let Some(fb) = self.overlay_framebuffers.as_mut() {
            fb.attachment(0, self.swapchain.images())?;
            fb.create(self.overlay_renderpass.as_ref().unwrap())?;
        }

        let img_count = self.swapchain.img_count as usize;
        self.refills.resize(img_count);
        self.refills.status = RefillStatus::None;
        self.back_fences.clear();

        // All command buffers are stale; refill every one while the device
        // is idle.
        for img_idx in 0..img_count {
            self.refill_image(img_idx)?;
        }

        self.emit_private(PrivateEvent::Resize {
            width: extent.width,
            height: extent.height,
        });
        self.set_status(CanvasStatus::Created);
        Ok(())
    }

    // ---- frame loop ------------------------------------------------------

    /// Runs one frame-loop iteration. Returns `false` when the loop should
    /// shut down.
    pub fn frame(&mut self) -> Result<bool> {
        // 1. Backend events (mouse/keyboard/resize/close).
        self.poll_backend();

        if CanvasStatus::from_u8(self.next_status.load(Ordering::SeqCst))
            == CanvasStatus::NeedDestroy
        {
            return Ok(false);
        }

        if self.paused || self.pending_recreate {
            self.pending_recreate = false;
            self.recreate()?;
            if self.paused {
                return Ok(true);
            }
        }

        // 2. Observe refill requests.
        if self.refill_requested.swap(false, Ordering::SeqCst) {
            self.refills.request();
            self.set_status(CanvasStatus::NeedRefill);
        }

        // 3. Wait for frame `cur_frame - F` to complete.
        self.fences_render_finished.wait(self.cur_frame)?;

        // 4. Acquire the next swapchain image.
        let img_idx = match self
            .swapchain
            .acquire(&self.sem_img_available, self.cur_frame)
        {
            SwapchainStatus::Ok(img_idx) => img_idx as usize,
            SwapchainStatus::NeedRecreate => {
                self.recreate()?;
                return Ok(true);
            }
            SwapchainStatus::Invalid => {
                log::error!("fatal swapchain acquire failure");
                self.close();
                return Ok(false);
            }
        };

        // 5. Back-fence: never reuse an image whose prior frame is pending.
        if let Some(prev_frame) = self.back_fences.acquire(img_idx, self.cur_frame) {
            self.fences_render_finished.wait(prev_frame)?;
        }

        // The image is now out of flight; refill its command buffer if a
        // refill generation is pending. A recording error aborts the frame
        // but not the canvas.
        if self.refills.needs(img_idx) {
            match self.refill_image(img_idx) {
                Ok(()) => {
                    if self.refills.mark(img_idx) {
                        self.set_status(CanvasStatus::Created);
                    }
                }
                Err(err) => {
                    log::error!("command buffer refill failed, aborting frame: {err}");
                    return Ok(true);
                }
            }
        }

        // 6. Frame events: private first, then public.
        let time = self.clock.time();
        let interval = self.clock.interval;
        self.emit_private(PrivateEvent::Interact);
        self.emit_private(PrivateEvent::Frame {
            idx: self.frame_idx,
            time,
            interval,
        });
        self.fire_timers(time);
        if self.overlay_cmds.is_some() {
            self.emit_private(PrivateEvent::Gui);
        }
        self.enqueue(Event::Frame {
            idx: self.frame_idx,
            time,
            interval,
        });

        // 7. Compose and send the submission.
        let mut submit = Submit::new();
        submit.wait(
            &self.sem_img_available,
            self.cur_frame,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )?;
        submit.commands(&self.cmds_render, img_idx)?;
        if let Some(overlay_cmds) = &self.overlay_cmds {
            submit.commands(overlay_cmds, img_idx)?;
        }
        submit.signal(&self.sem_render_finished, self.cur_frame)?;

        self.emit_private(PrivateEvent::PreSend);
        let send_result = submit.send(
            &self.gpu,
            self.render_queue,
            Some((&self.fences_render_finished, self.cur_frame)),
        );
        match send_result {
            Ok(()) => {}
            Err(err) if err.is_transient() => {
                self.recreate()?;
                return Ok(true);
            }
            Err(err) => {
                log::error!("fatal submit failure: {err}");
                self.close();
                return Err(err);
            }
        }
        self.emit_private(PrivateEvent::PostSend);

        // 8. Present.
        let present_queue = self.gpu.raw_queue(self.present_queue)?;
        match self
            .swapchain
            .present(present_queue, &self.sem_render_finished, self.cur_frame)
        {
            SwapchainStatus::Ok(_) => {}
            SwapchainStatus::NeedRecreate => {
                self.pending_recreate = true;
            }
            SwapchainStatus::Invalid => {
                log::error!("fatal swapchain present failure");
                self.close();
                return Ok(false);
            }
        }

        // 9. Defensive idle wait; required when the present queue differs
        // from the submit queue on some drivers.
        if self.present_queue != self.render_queue {
            self.gpu.queue_wait_idle(self.present_queue)?;
        }

        // 10. Advance.
        self.cur_frame = (self.cur_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_idx += 1;
        self.clock.tick();
        Ok(true)
    }

    fn fire_timers(&mut self, time: f64) {
        let mut due = Vec::new();
        for timer in self.timers.iter_mut() {
            if time >= timer.next_fire {
                due.push(PrivateEvent::Timer {
                    idx: timer.idx,
                    time,
                    interval: timer.interval,
                });
                timer.idx += 1;
                timer.next_fire = time + timer.interval;
            }
        }
        for event in due {
            self.emit_private(event);
        }
    }

    /// Runs the frame loop until close is requested or `n_frames` iterations
    /// have run.
    pub fn run(&mut self, n_frames: Option<u64>) -> Result<()> {
        self.emit_private(PrivateEvent::Init);
        self.enqueue(Event::Init);
        let mut iterations = 0u64;
        let result = loop {
            if let Some(n) = n_frames {
                if iterations >= n {
                    break Ok(());
                }
            }
            match self.frame() {
                Ok(true) => iterations += 1,
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        // Destructors run in order even on fatal termination.
        self.shutdown();
        result
    }

    /// Orderly teardown: final destroy event, event-thread join, device
    /// idle. Resource destruction follows on drop, leaves first.
    fn shutdown(&mut self) {
        if self.status() == CanvasStatus::Destroyed {
            return;
        }
        log::trace!("canvas shutting down");
        self.set_status(CanvasStatus::NeedDestroy);
        self.emit_private(PrivateEvent::Destroy);
        self.fifo.close();
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
        if let Err(err) = self.gpu.wait_idle() {
            log::error!("device wait during canvas shutdown failed: {err}");
        }
        self.set_status(CanvasStatus::Destroyed);
        log::trace!("canvas destroyed");
    }

    /// Hard-sync readback of the last rendered swapchain image, as tightly
    /// packed RGBA bytes. Not for per-frame use.
    pub fn screenshot(&mut self) -> Result<Vec<u8>> {
        self.gpu.wait_idle()?;
        let extent = self.swapchain.extent();
        let img_idx = self.swapchain.img_idx as usize;

        let mut staging = Images::new(&self.gpu, vk::ImageType::TYPE_2D, 1);
        staging.format(self.swapchain.image_format())?;
        staging.size(extent.width, extent.height, 1)?;
        staging.tiling(vk::ImageTiling::LINEAR)?;
        staging.usage(vk::ImageUsageFlags::TRANSFER_DST)?;
        staging.memory(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.create()?;

        let cmds = &self.cmds_transfer;
        cmds.reset(0)?;
        cmds.begin(0)?;
        // Only the image being copied is known to be in PRESENT_SRC layout;
        // the other swapchain images must be left alone.
        let to_src = Barrier::new()
            .stages(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            )
            .image(self.swapchain.images(), img_idx)?
            .images_layout(
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )
            .images_access(vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_READ);
        cmds.barrier(0, &to_src)?;
        let staging_dst = Barrier::new()
            .stages(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            )
            .images(&staging)
            .images_layout(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )
            .images_access(vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE);
        cmds.barrier(0, &staging_dst)?;
        cmds.copy_image(0, self.swapchain.images(), img_idx, &staging, 0)?;
        let to_present = Barrier::new()
            .stages(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            )
            .image(self.swapchain.images(), img_idx)?
            .images_layout(
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            )
            .images_access(vk::AccessFlags::TRANSFER_READ, vk::AccessFlags::empty());
        cmds.barrier(0, &to_present)?;
        cmds.end(0)?;
        cmds.submit_sync(self.transfer_queue)?;

        let mut rgba = vec![0u8; (extent.width * extent.height * 4) as usize];
        staging.download(0, &mut rgba)?;
        cmds.reset(0)?;
        Ok(rgba)
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_completes_within_img_count_frames() {
        // P7: after a request, round-robin image acquisition refills each
        // buffer exactly once, then the status returns to None.
        let img_count = 3;
        let mut refills = PendingRefill::new(img_count);
        refills.request();
        assert_eq!(refills.status, RefillStatus::Requested);

        let mut refilled = vec![0u32; img_count];
        for frame in 0..img_count {
            let img_idx = frame % img_count;
            if refills.needs(img_idx) {
                refilled[img_idx] += 1;
                refills.mark(img_idx);
            }
        }
        assert_eq!(refilled, vec![1; img_count]);
        assert_eq!(refills.status, RefillStatus::None);
    }

    #[test]
    fn refill_skips_already_completed_images() {
        let mut refills = PendingRefill::new(2);
        refills.request();
        assert!(refills.needs(0));
        refills.mark(0);
        assert!(!refills.needs(0));
        assert!(refills.needs(1));
        assert_eq!(refills.status, RefillStatus::Processing);
        refills.mark(1);
        assert_eq!(refills.status, RefillStatus::None);
        assert!(!refills.needs(0));
    }

    #[test]
    fn second_request_restarts_generation() {
        let mut refills = PendingRefill::new(2);
        refills.request();
        refills.mark(0);
        refills.request();
        assert!(refills.needs(0));
        assert!(refills.needs(1));
    }

    /// P5: with F frames in flight and S > F swapchain images, simulate
    /// adversarial image orderings and assert the loop never records into an
    /// image whose prior frame's fence has not been waited on.
    #[test]
    fn back_fence_prevents_image_reuse() {
        const F: usize = 2;
        const S: usize = 3;
        // Ping-pong acquisition order exercising image reuse under F < S.
        let orders: [&[usize]; 3] = [
            &[0, 1, 0, 1, 0, 1, 2, 0, 2, 0],
            &[0, 1, 2, 0, 1, 2, 0, 1, 2, 0],
            &[2, 2, 2, 2, 2, 2],
        ];
        for order in orders {
            let mut back_fences = BackFences::new();
            // fence_waited_since_submit[f]: model of the host-visible fence.
            let mut fence_signaled = [true; F];
            // Which frame last submitted into each image.
            let mut image_owner: [Option<usize>; S] = [None; S];
            let mut cur_frame = 0usize;

            for &img_idx in order {
                // Step 3: wait own frame fence.
                fence_signaled[cur_frame] = true;
                // Step 5: back-fence wait.
                if let Some(prev) = back_fences.acquire(img_idx, cur_frame) {
                    fence_signaled[prev] = true;
                }
                // Record: the image's prior frame must have completed.
                if let Some(owner) = image_owner[img_idx] {
                    assert!(
                        fence_signaled[owner],
                        "recorded into image {img_idx} while frame {owner} in flight"
                    );
                }
                // Submit: fence is reset and goes in flight.
                fence_signaled[cur_frame] = false;
                image_owner[img_idx] = Some(cur_frame);
                cur_frame = (cur_frame + 1) % F;
            }
        }
    }

    #[test]
    fn canvas_status_roundtrip() {
        for status in [
            CanvasStatus::Init,
            CanvasStatus::Created,
            CanvasStatus::NeedRefill,
            CanvasStatus::NeedRecreate,
            CanvasStatus::NeedDestroy,
            CanvasStatus::Destroyed,
        ] {
            assert_eq!(CanvasStatus::from_u8(status as u8), status);
        }
    }
}
