//! Event system: a bounded FIFO bridging the frame loop (producer) and a
//! consumer thread for public events, synchronous private events on the loop
//! thread, and mouse/keyboard state derivation.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use bitflags::bitflags;
use nalgebra::Vector2;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::{MAX_EVENT_CALLBACKS, MAX_FIFO_CAPACITY};

/// Maximum acceptable pending duration in the event queue, in seconds.
/// Beyond this, the producer sheds the oldest event of the same type.
pub const MAX_EVENT_PENDING_DURATION: f64 = 0.5;

pub const MOUSE_CLICK_MAX_DELAY: f64 = 0.25;
pub const MOUSE_CLICK_MAX_SHIFT: f64 = 5.0;
pub const MOUSE_DOUBLE_CLICK_MAX_DELAY: f64 = 0.3;
pub const MOUSE_DRAG_MIN_SHIFT: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Press,
    Release,
}

bitflags! {
    #[derive(Default)]
    pub struct KeyModifiers: u32 {
        const SHIFT   = 0x0001;
        const CONTROL = 0x0002;
        const ALT     = 0x0004;
        const SUPER   = 0x0008;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Escape,
    Space,
    Enter,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Char(char),
    Unknown(u32),
}

/// Public events, enqueued on the loop thread and dispatched to user
/// callbacks on the event thread.
#[derive(Debug, Clone)]
pub enum Event {
    Init,
    MouseButton {
        button: MouseButton,
        action: Action,
        modifiers: KeyModifiers,
        pos: Vector2<f64>,
    },
    MouseMove {
        pos: Vector2<f64>,
    },
    MouseWheel {
        pos: Vector2<f64>,
        dir: Vector2<f64>,
    },
    MouseDragBegin {
        pos: Vector2<f64>,
        button: MouseButton,
    },
    MouseDragEnd {
        pos: Vector2<f64>,
        button: MouseButton,
    },
    MouseClick {
        pos: Vector2<f64>,
        button: MouseButton,
    },
    MouseDoubleClick {
        pos: Vector2<f64>,
        button: MouseButton,
    },
    Key {
        action: Action,
        key: KeyCode,
        modifiers: KeyModifiers,
    },
    Frame {
        idx: u64,
        time: f64,
        interval: f64,
    },
    Screencast {
        idx: u64,
        time: f64,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Init,
    MouseButton,
    MouseMove,
    MouseWheel,
    MouseDragBegin,
    MouseDragEnd,
    MouseClick,
    MouseDoubleClick,
    Key,
    Frame,
    Screencast,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Init => EventKind::Init,
            Event::MouseButton { .. } => EventKind::MouseButton,
            Event::MouseMove { .. } => EventKind::MouseMove,
            Event::MouseWheel { .. } => EventKind::MouseWheel,
            Event::MouseDragBegin { .. } => EventKind::MouseDragBegin,
            Event::MouseDragEnd { .. } => EventKind::MouseDragEnd,
            Event::MouseClick { .. } => EventKind::MouseClick,
            Event::MouseDoubleClick { .. } => EventKind::MouseDoubleClick,
            Event::Key { .. } => EventKind::Key,
            Event::Frame { .. } => EventKind::Frame,
            Event::Screencast { .. } => EventKind::Screencast,
        }
    }
}

/// Private events, dispatched synchronously on the loop thread.
#[derive(Debug, Clone)]
pub enum PrivateEvent {
    Init,
    Refill { img_idx: usize },
    Interact,
    Frame { idx: u64, time: f64, interval: f64 },
    Gui,
    Timer { idx: u64, time: f64, interval: f64 },
    Resize { width: u32, height: u32 },
    PreSend,
    PostSend,
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivateEventKind {
    Init,
    Refill,
    Interact,
    Frame,
    Gui,
    Timer,
    Resize,
    PreSend,
    PostSend,
    Destroy,
}

impl PrivateEvent {
    pub fn kind(&self) -> PrivateEventKind {
        match self {
            PrivateEvent::Init => PrivateEventKind::Init,
            PrivateEvent::Refill { .. } => PrivateEventKind::Refill,
            PrivateEvent::Interact => PrivateEventKind::Interact,
            PrivateEvent::Frame { .. } => PrivateEventKind::Frame,
            PrivateEvent::Gui => PrivateEventKind::Gui,
            PrivateEvent::Timer { .. } => PrivateEventKind::Timer,
            PrivateEvent::Resize { .. } => PrivateEventKind::Resize,
            PrivateEvent::PreSend => PrivateEventKind::PreSend,
            PrivateEvent::PostSend => PrivateEventKind::PostSend,
            PrivateEvent::Destroy => PrivateEventKind::Destroy,
        }
    }
}

/// Dispatch order for private-event handlers: handlers registered with a zero
/// param run in a first pass, handlers with a positive param in a second
/// pass, preserving registration order within each pass.
pub(crate) fn private_dispatch_order(
    entries: &[(PrivateEventKind, f64)],
    kind: PrivateEventKind,
) -> Vec<usize> {
    let mut order = Vec::new();
    for pass in 0..2 {
        for (idx, (entry_kind, param)) in entries.iter().enumerate() {
            if *entry_kind != kind {
                continue;
            }
            if (pass == 0) == (*param <= 0.0) {
                order.push(idx);
            }
        }
    }
    order
}

struct FifoInner {
    queue: VecDeque<(Event, Instant)>,
    closed: bool,
}

/// Bounded lock-protected FIFO with condition-variable signaling. The
/// producer never blocks; when full or stale, the oldest event of the same
/// type is shed.
pub(crate) struct EventFifo {
    inner: Mutex<FifoInner>,
    condvar: Condvar,
}

impl EventFifo {
    pub(crate) fn new() -> EventFifo {
        EventFifo {
            inner: Mutex::new(FifoInner {
                queue: VecDeque::with_capacity(MAX_FIFO_CAPACITY),
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn enqueue(&self, event: Event) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let kind = event.kind();
        if inner.queue.len() >= MAX_FIFO_CAPACITY {
            // Shed the oldest event of the same type to keep latency bounded.
            if let Some(pos) = inner.queue.iter().position(|(e, _)| e.kind() == kind) {
                log::warn!("event queue full, shedding pending {kind:?} event");
                let _ = inner.queue.remove(pos);
            } else {
                log::warn!("event queue full, dropping incoming {kind:?} event");
                return;
            }
        } else if let Some((_, front_time)) = inner.queue.front() {
            if front_time.elapsed().as_secs_f64() > MAX_EVENT_PENDING_DURATION {
                if let Some(pos) = inner.queue.iter().position(|(e, t)| {
                    e.kind() == kind
                        && t.elapsed().as_secs_f64() > MAX_EVENT_PENDING_DURATION
                }) {
                    log::warn!("shedding stale pending {kind:?} event");
                    let _ = inner.queue.remove(pos);
                }
            }
        }
        inner.queue.push_back((event, Instant::now()));
        drop(inner);
        self.condvar.notify_one();
    }

    /// Dequeues the next event; with `wait`, blocks until an event arrives or
    /// the queue is closed. Returns `None` once closed and drained.
    pub(crate) fn dequeue(&self, wait: bool) -> Option<Event> {
        let mut inner = self.inner.lock();
        loop {
            if let Some((event, _)) = inner.queue.pop_front() {
                return Some(event);
            }
            if inner.closed || !wait {
                return None;
            }
            self.condvar.wait(&mut inner);
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Marks the queue closed and wakes the consumer.
    pub(crate) fn close(&self) {
        self.inner.lock().closed = true;
        self.condvar.notify_all();
    }
}

pub(crate) type EventCallback = Box<dyn FnMut(&Event) + Send>;

pub(crate) struct EventCallbackEntry {
    pub(crate) kind: EventKind,
    pub(crate) cb: EventCallback,
}

/// Registry shared between the canvas (registration) and the event thread
/// (dispatch). Panics inside user callbacks are caught at the dispatch
/// boundary and logged; they never reach the producer.
pub(crate) struct EventDispatcher {
    pub(crate) callbacks: Mutex<Vec<EventCallbackEntry>>,
}

impl EventDispatcher {
    pub(crate) fn new() -> EventDispatcher {
        EventDispatcher {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, kind: EventKind, cb: EventCallback) -> Result<()> {
        let mut callbacks = self.callbacks.lock();
        if callbacks.len() >= MAX_EVENT_CALLBACKS {
            return Err(Error::CapacityExceeded {
                what: "event callbacks",
                max: MAX_EVENT_CALLBACKS,
            });
        }
        callbacks.push(EventCallbackEntry { kind, cb });
        Ok(())
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        let kind = event.kind();
        let mut callbacks = self.callbacks.lock();
        for entry in callbacks.iter_mut() {
            if entry.kind != kind {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| (entry.cb)(event)));
            if result.is_err() {
                log::error!("event callback for {kind:?} panicked");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseState {
    Inactive,
    Drag,
    Wheel,
    Click,
    DoubleClick,
    Capture,
}

/// Mouse state machine, run on the producer thread. Raw backend events go
/// in; the corresponding public events (raw plus derived drag/click events)
/// come out. Time is supplied by the caller, in seconds since canvas start.
pub struct Mouse {
    pub(crate) state: MouseState,
    prev_state: MouseState,
    button: Option<MouseButton>,
    press_pos: Vector2<f64>,
    pub(crate) cur_pos: Vector2<f64>,
    click_pos: Vector2<f64>,
    wheel_delta: Vector2<f64>,
    press_time: f64,
    click_time: f64,
    capture: bool,
}

impl Mouse {
    pub fn new() -> Mouse {
        Mouse {
            state: MouseState::Inactive,
            prev_state: MouseState::Inactive,
            button: None,
            press_pos: Vector2::zeros(),
            cur_pos: Vector2::zeros(),
            click_pos: Vector2::zeros(),
            wheel_delta: Vector2::zeros(),
            press_time: f64::NEG_INFINITY,
            click_time: f64::NEG_INFINITY,
            capture: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Mouse::new();
    }

    pub fn state(&self) -> MouseState {
        self.state
    }

    pub fn prev_state(&self) -> MouseState {
        self.prev_state
    }

    pub fn position(&self) -> Vector2<f64> {
        self.cur_pos
    }

    pub fn wheel_delta(&self) -> Vector2<f64> {
        self.wheel_delta
    }

    /// Overlay capture: while set, input is swallowed.
    pub fn capture(&mut self, capture: bool) {
        self.capture = capture;
        self.state = if capture {
            MouseState::Capture
        } else {
            MouseState::Inactive
        };
    }

    fn set_state(&mut self, state: MouseState) {
        self.prev_state = self.state;
        self.state = state;
    }

    pub fn on_button(
        &mut self,
        button: MouseButton,
        action: Action,
        modifiers: KeyModifiers,
        time: f64,
    ) -> Vec<Event> {
        if self.capture {
            return Vec::new();
        }
        let mut events = vec![Event::MouseButton {
            button,
            action,
            modifiers,
            pos: self.cur_pos,
        }];
        match action {
            Action::Press => {
                let shift = (self.cur_pos - self.click_pos).norm();
                if time - self.click_time < MOUSE_DOUBLE_CLICK_MAX_DELAY
                    && shift < MOUSE_CLICK_MAX_SHIFT
                {
                    self.set_state(MouseState::DoubleClick);
                    self.click_time = f64::NEG_INFINITY;
                    events.push(Event::MouseDoubleClick {
                        pos: self.cur_pos,
                        button,
                    });
                } else {
                    self.button = Some(button);
                    self.press_pos = self.cur_pos;
                    self.press_time = time;
                }
            }
            Action::Release => {
                match self.state {
                    MouseState::Drag => {
                        self.set_state(MouseState::Inactive);
                        events.push(Event::MouseDragEnd {
                            pos: self.cur_pos,
                            button,
                        });
                    }
                    MouseState::DoubleClick => {
                        self.set_state(MouseState::Inactive);
                    }
                    _ => {
                        let shift = (self.cur_pos - self.press_pos).norm();
                        if time - self.press_time < MOUSE_CLICK_MAX_DELAY
                            && shift < MOUSE_CLICK_MAX_SHIFT
                        {
                            self.set_state(MouseState::Click);
                            self.click_time = time;
                            self.click_pos = self.cur_pos;
                            events.push(Event::MouseClick {
                                pos: self.cur_pos,
                                button,
                            });
                        } else {
                            self.set_state(MouseState::Inactive);
                        }
                    }
                }
                self.button = None;
            }
        }
        events
    }

    pub fn on_move(&mut self, pos: Vector2<f64>, _time: f64) -> Vec<Event> {
        if self.capture {
            self.cur_pos = pos;
            return Vec::new();
        }
        self.cur_pos = pos;
        let mut events = vec![Event::MouseMove { pos }];
        match self.state {
            MouseState::Inactive => {
                if let Some(button) = self.button {
                    if (pos - self.press_pos).norm() >= MOUSE_DRAG_MIN_SHIFT {
                        self.set_state(MouseState::Drag);
                        events.push(Event::MouseDragBegin {
                            pos: self.press_pos,
                            button,
                        });
                    }
                }
            }
            // One-shot states decay on the next motion.
            MouseState::Wheel | MouseState::Click | MouseState::DoubleClick => {
                self.set_state(MouseState::Inactive);
            }
            _ => {}
        }
        events
    }

    pub fn on_wheel(&mut self, dir: Vector2<f64>, _time: f64) -> Vec<Event> {
        if self.capture {
            return Vec::new();
        }
        if dir == Vector2::zeros() {
            return Vec::new();
        }
        self.set_state(MouseState::Wheel);
        self.wheel_delta = dir;
        vec![Event::MouseWheel {
            pos: self.cur_pos,
            dir,
        }]
    }
}

impl Default for Mouse {
    fn default() -> Self {
        Mouse::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardState {
    Inactive,
    Active,
}

pub struct Keyboard {
    pub(crate) state: KeyboardState,
    key: Option<KeyCode>,
    modifiers: KeyModifiers,
    press_time: f64,
    capture: bool,
}

impl Keyboard {
    pub fn new() -> Keyboard {
        Keyboard {
            state: KeyboardState::Inactive,
            key: None,
            modifiers: KeyModifiers::empty(),
            press_time: f64::NEG_INFINITY,
            capture: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Keyboard::new();
    }

    pub fn state(&self) -> KeyboardState {
        self.state
    }

    pub fn key(&self) -> Option<KeyCode> {
        self.key
    }

    pub fn modifiers(&self) -> KeyModifiers {
        self.modifiers
    }

    pub fn capture(&mut self, capture: bool) {
        self.capture = capture;
    }

    pub fn on_key(
        &mut self,
        action: Action,
        key: KeyCode,
        modifiers: KeyModifiers,
        time: f64,
    ) -> Vec<Event> {
        if self.capture {
            return Vec::new();
        }
        match action {
            Action::Press => {
                self.state = KeyboardState::Active;
                self.key = Some(key);
                self.modifiers = modifiers;
                self.press_time = time;
            }
            Action::Release => {
                self.state = KeyboardState::Inactive;
                self.key = None;
                self.modifiers = modifiers;
            }
        }
        vec![Event::Key {
            action,
            key,
            modifiers,
        }]
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;

    fn pos(x: f64, y: f64) -> Vector2<f64> {
        Vector2::new(x, y)
    }

    #[test]
    fn fifo_preserves_emission_order() {
        let fifo = EventFifo::new();
        for i in 0..10u64 {
            fifo.enqueue(Event::Frame {
                idx: i,
                time: 0.0,
                interval: 0.0,
            });
        }
        for i in 0..10u64 {
            match fifo.dequeue(false) {
                Some(Event::Frame { idx, .. }) => assert_eq!(idx, i),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(fifo.dequeue(false).is_none());
    }

    #[test]
    fn fifo_consumer_thread_observes_emission_order() {
        let fifo = Arc::new(EventFifo::new());
        let consumer_fifo = fifo.clone();
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            while let Some(event) = consumer_fifo.dequeue(true) {
                tx.send(event).unwrap();
            }
        });
        for i in 0..32u64 {
            fifo.enqueue(Event::Frame {
                idx: i,
                time: 0.0,
                interval: 0.0,
            });
        }
        fifo.close();
        handle.join().unwrap();
        let received: Vec<u64> = rx
            .iter()
            .map(|event| match event {
                Event::Frame { idx, .. } => idx,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(received, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn fifo_sheds_same_type_when_full() {
        let fifo = EventFifo::new();
        for i in 0..(MAX_FIFO_CAPACITY as u64 + 16) {
            fifo.enqueue(Event::Frame {
                idx: i,
                time: 0.0,
                interval: 0.0,
            });
        }
        assert!(fifo.pending() <= MAX_FIFO_CAPACITY);
        // The newest event must have survived the shedding.
        let mut last = None;
        while let Some(Event::Frame { idx, .. }) = fifo.dequeue(false) {
            last = Some(idx);
        }
        assert_eq!(last, Some(MAX_FIFO_CAPACITY as u64 + 15));
    }

    #[test]
    fn fifo_drops_new_event_when_full_of_other_types() {
        let fifo = EventFifo::new();
        for _ in 0..MAX_FIFO_CAPACITY {
            fifo.enqueue(Event::Init);
        }
        fifo.enqueue(Event::MouseMove { pos: pos(0.0, 0.0) });
        assert_eq!(fifo.pending(), MAX_FIFO_CAPACITY);
    }

    #[test]
    fn closed_fifo_wakes_consumer() {
        let fifo = Arc::new(EventFifo::new());
        let consumer_fifo = fifo.clone();
        let handle = std::thread::spawn(move || consumer_fifo.dequeue(true));
        fifo.close();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn private_priority_two_pass() {
        use PrivateEventKind::Frame;
        // Priorities 0,0,1,0,1 must run as (0,0,0,1,1).
        let entries = vec![
            (Frame, 0.0),
            (Frame, 0.0),
            (Frame, 1.0),
            (Frame, 0.0),
            (Frame, 1.0),
        ];
        assert_eq!(private_dispatch_order(&entries, Frame), vec![0, 1, 3, 2, 4]);
    }

    #[test]
    fn private_priority_scenario() {
        use PrivateEventKind::Frame;
        // Callbacks a,b,c,d with params 0,0,1,0 run as [a, b, d, c].
        let entries = vec![(Frame, 0.0), (Frame, 0.0), (Frame, 1.0), (Frame, 0.0)];
        assert_eq!(private_dispatch_order(&entries, Frame), vec![0, 1, 3, 2]);
    }

    #[test]
    fn private_order_filters_kind() {
        use PrivateEventKind::{Frame, Resize};
        let entries = vec![(Frame, 0.0), (Resize, 0.0), (Frame, 1.0)];
        assert_eq!(private_dispatch_order(&entries, Frame), vec![0, 2]);
        assert_eq!(private_dispatch_order(&entries, Resize), vec![1]);
    }

    #[test]
    fn dispatcher_catches_panicking_callbacks() {
        let dispatcher = EventDispatcher::new();
        dispatcher
            .register(EventKind::Init, Box::new(|_| panic!("user bug")))
            .unwrap();
        let (tx, rx) = mpsc::channel();
        dispatcher
            .register(
                EventKind::Init,
                Box::new(move |_| {
                    tx.send(()).unwrap();
                }),
            )
            .unwrap();
        dispatcher.dispatch(&Event::Init);
        // The panicking callback must not prevent later callbacks.
        rx.try_recv().unwrap();
    }

    #[test]
    fn callback_capacity_is_bounded() {
        let dispatcher = EventDispatcher::new();
        for _ in 0..MAX_EVENT_CALLBACKS {
            dispatcher
                .register(EventKind::Frame, Box::new(|_| {}))
                .unwrap();
        }
        assert!(dispatcher
            .register(EventKind::Frame, Box::new(|_| {}))
            .is_err());
    }

    #[test]
    fn click_sequence() {
        let mut mouse = Mouse::new();
        mouse.on_move(pos(10.0, 10.0), 0.0);
        let events = mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 1.0);
        assert_eq!(events.len(), 1);
        let events =
            mouse.on_button(MouseButton::Left, Action::Release, KeyModifiers::empty(), 1.1);
        assert!(matches!(events[1], Event::MouseClick { .. }));
        assert_eq!(mouse.state(), MouseState::Click);
    }

    #[test]
    fn slow_release_is_not_a_click() {
        let mut mouse = Mouse::new();
        mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.0);
        let events =
            mouse.on_button(MouseButton::Left, Action::Release, KeyModifiers::empty(), 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(mouse.state(), MouseState::Inactive);
    }

    #[test]
    fn drag_sequence() {
        let mut mouse = Mouse::new();
        mouse.on_move(pos(0.0, 0.0), 0.0);
        mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.1);
        let events = mouse.on_move(pos(20.0, 0.0), 0.2);
        assert!(matches!(events[1], Event::MouseDragBegin { .. }));
        assert_eq!(mouse.state(), MouseState::Drag);
        let events =
            mouse.on_button(MouseButton::Left, Action::Release, KeyModifiers::empty(), 5.0);
        assert!(matches!(events[1], Event::MouseDragEnd { .. }));
        assert_eq!(mouse.state(), MouseState::Inactive);
    }

    #[test]
    fn small_motion_does_not_begin_drag() {
        let mut mouse = Mouse::new();
        mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.0);
        let events = mouse.on_move(pos(1.0, 1.0), 0.1);
        assert_eq!(events.len(), 1);
        assert_eq!(mouse.state(), MouseState::Inactive);
    }

    #[test]
    fn double_click_sequence() {
        let mut mouse = Mouse::new();
        mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.0);
        mouse.on_button(MouseButton::Left, Action::Release, KeyModifiers::empty(), 0.05);
        let events = mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.2);
        assert!(matches!(events[1], Event::MouseDoubleClick { .. }));
        assert_eq!(mouse.state(), MouseState::DoubleClick);
        // Releasing the second press emits neither click nor drag-end.
        let events =
            mouse.on_button(MouseButton::Left, Action::Release, KeyModifiers::empty(), 0.25);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn late_second_press_is_not_a_double_click() {
        let mut mouse = Mouse::new();
        mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.0);
        mouse.on_button(MouseButton::Left, Action::Release, KeyModifiers::empty(), 0.05);
        let events = mouse.on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 1.0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn wheel_is_one_shot() {
        let mut mouse = Mouse::new();
        let events = mouse.on_wheel(pos(0.0, 1.0), 0.0);
        assert!(matches!(events[0], Event::MouseWheel { .. }));
        assert_eq!(mouse.state(), MouseState::Wheel);
        mouse.on_move(pos(5.0, 5.0), 0.1);
        assert_eq!(mouse.state(), MouseState::Inactive);
        assert!(mouse.on_wheel(Vector2::zeros(), 0.2).is_empty());
    }

    #[test]
    fn captured_mouse_swallows_input() {
        let mut mouse = Mouse::new();
        mouse.capture(true);
        assert!(mouse
            .on_button(MouseButton::Left, Action::Press, KeyModifiers::empty(), 0.0)
            .is_empty());
        assert!(mouse.on_wheel(pos(0.0, 1.0), 0.1).is_empty());
        assert_eq!(mouse.state(), MouseState::Capture);
    }

    #[test]
    fn keyboard_two_state() {
        let mut keyboard = Keyboard::new();
        keyboard.on_key(Action::Press, KeyCode::Space, KeyModifiers::SHIFT, 0.0);
        assert_eq!(keyboard.state(), KeyboardState::Active);
        assert_eq!(keyboard.key(), Some(KeyCode::Space));
        keyboard.on_key(Action::Release, KeyCode::Space, KeyModifiers::empty(), 0.1);
        assert_eq!(keyboard.state(), KeyboardState::Inactive);
        assert_eq!(keyboard.key(), None);
    }
}
