//! Pads: typed, directional connection points between elements.
//!
//! A source pad is linked to exactly one sink pad. Data moves across the
//! link in one of two scheduling modes:
//!
//! - **Push**: the upstream thread calls [`Pad::push`] on its source pad,
//!   which runs the peer's chain handler synchronously.
//! - **Pull**: the downstream thread calls [`Pad::pull_range`] on its sink
//!   pad, which runs the peer's getrange handler synchronously.
//!
//! Every streaming call on a pad holds that pad's stream lock, so data and
//! serialized events from one upstream never interleave, while different
//! pads of the same element can be driven by different threads.
//!
//! # Lifecycle
//!
//! ```text
//! UNLINKED --link--> LINKED --caps--> NEGOTIATED --activate--> ACTIVE <--> FLUSHING
//! ```
//!
//! An inactive pad is flushing. Negotiation happens lazily: the first push
//! on a source pad without caps queries the peer, fixates the common caps
//! and sends a CAPS event ahead of the buffer. An ANY intersection needs no
//! CAPS event.
//!
//! # Handlers
//!
//! Chain, getrange, event, query and activation handlers are resolved in
//! order: a closure installed on the pad, then the owning element's
//! [`ElementImpl`](crate::element::ElementImpl), then the default
//! behaviour (events and queries are forwarded through the element's pads
//! of the opposite direction).
//!
//! ```rust
//! use padline::buffer::Buffer;
//! use padline::flow::FlowSuccess;
//! use padline::pad::{Pad, PadDirection};
//!
//! let src = Pad::new("src", PadDirection::Src);
//! let sink = Pad::new("sink", PadDirection::Sink);
//! sink.set_chain_function(|_pad, buffer| {
//!     assert_eq!(buffer.size(), 4);
//!     Ok(FlowSuccess::Ok)
//! });
//! src.link(&sink).unwrap();
//! assert!(sink.set_active(true) && src.set_active(true));
//! assert_eq!(src.push(Buffer::from_slice(b"abcd")), Ok(FlowSuccess::Ok));
//! ```

mod probe;
mod template;

pub use probe::{PadProbeData, PadProbeInfo, PadProbeReturn, PadProbeType, ProbeId};
pub use template::{PadPresence, PadTemplate};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, trace, warn};

use crate::buffer::{Buffer, BufferList};
use crate::caps::Caps;
use crate::element::Element;
use crate::error::PadLinkError;
use crate::event::{Event, EventType, EventView};
use crate::flow::{FlowError, FlowResult, FlowReturn, FlowSuccess, FlushTarget};
use crate::message::{ErrorKind, StreamError};
use crate::query::{Query, QueryType};
use probe::{Probe, ProbeCallback, ProbeOutcome};

// ============================================================================
// Basic types
// ============================================================================

/// Direction of data flow through a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data.
    Src,
    /// Consumes data.
    Sink,
}

impl PadDirection {
    /// The other direction.
    pub const fn opposite(self) -> Self {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Scheduling mode of an active pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Inactive.
    #[default]
    None,
    /// Upstream pushes.
    Push,
    /// Downstream pulls.
    Pull,
}

/// Pad flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PadFlags(u32);

impl PadFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Caps queries are answered with the peers of the element's opposite pads.
    pub const PROXY_CAPS: Self = Self(1 << 0);
    /// The next push renegotiates.
    pub const NEED_RECONFIGURE: Self = Self(1 << 1);

    /// True if all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Bitwise OR.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Handle returned by [`Pad::add_flush_target`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushTargetId(u64);

/// Push-mode receive handler.
pub type ChainFunction = Arc<dyn Fn(&Pad, Buffer) -> FlowResult + Send + Sync>;
/// Push-mode list receive handler.
pub type ChainListFunction = Arc<dyn Fn(&Pad, BufferList) -> FlowResult + Send + Sync>;
/// Pull-mode supply handler.
pub type GetRangeFunction = Arc<dyn Fn(&Pad, u64, usize) -> Result<Buffer, FlowError> + Send + Sync>;
/// Event handler.
pub type EventFunction = Arc<dyn Fn(&Pad, Event) -> bool + Send + Sync>;
/// Query handler.
pub type QueryFunction = Arc<dyn Fn(&Pad, &mut Query) -> bool + Send + Sync>;
/// Activation handler.
pub type ActivateModeFunction = Arc<dyn Fn(&Pad, PadMode, bool) -> bool + Send + Sync>;

#[derive(Default, Clone)]
struct Handlers {
    chain: Option<ChainFunction>,
    chain_list: Option<ChainListFunction>,
    getrange: Option<GetRangeFunction>,
    event: Option<EventFunction>,
    query: Option<QueryFunction>,
    activate_mode: Option<ActivateModeFunction>,
}

enum PadData {
    Buffer(Buffer),
    List(BufferList),
}

impl PadData {
    fn probe_type(&self) -> PadProbeType {
        match self {
            PadData::Buffer(_) => PadProbeType::BUFFER,
            PadData::List(_) => PadProbeType::BUFFER_LIST,
        }
    }

    fn probe_data(&self) -> PadProbeData<'_> {
        match self {
            PadData::Buffer(buffer) => PadProbeData::Buffer(buffer),
            PadData::List(list) => PadProbeData::BufferList(list),
        }
    }
}

#[derive(Default)]
struct PadState {
    peer: Weak<Pad>,
    caps: Option<Caps>,
    negotiated: bool,
    sticky: Vec<Event>,
    replay_sticky: bool,
    eos: bool,
    mode: PadMode,
    last_flow: Option<FlowReturn>,
}

impl PadState {
    fn store_sticky(&mut self, event: Event) {
        let ty = event.event_type();
        if let Some(slot) = self.sticky.iter_mut().find(|e| e.event_type() == ty) {
            *slot = event;
            return;
        }
        let order = ty.sticky_order();
        let pos = self
            .sticky
            .iter()
            .position(|e| e.event_type().sticky_order() > order)
            .unwrap_or(self.sticky.len());
        self.sticky.insert(pos, event);
    }

    fn remove_sticky(&mut self, ty: EventType) {
        self.sticky.retain(|e| e.event_type() != ty);
    }
}

// ============================================================================
// Pad
// ============================================================================

/// A connection point of an element.
pub struct Pad {
    name: String,
    direction: PadDirection,
    template: Option<PadTemplate>,
    this: Weak<Pad>,
    parent: RwLock<Weak<Element>>,
    state: Mutex<PadState>,
    flushing: AtomicBool,
    flags: AtomicU32,
    stream_lock: Mutex<()>,
    handlers: RwLock<Handlers>,
    probes: Mutex<Vec<Probe>>,
    flush_targets: Mutex<Vec<(FlushTargetId, Weak<dyn FlushTarget>)>>,
    next_id: AtomicU64,
}

impl Pad {
    /// Free-standing pad without template. It accepts any caps.
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Arc<Pad> {
        Self::build(name.into(), direction, None)
    }

    /// Pad instantiated from a template.
    pub fn from_template(template: &PadTemplate, name: impl Into<String>) -> Arc<Pad> {
        Self::build(name.into(), template.direction(), Some(template.clone()))
    }

    fn build(name: String, direction: PadDirection, template: Option<PadTemplate>) -> Arc<Pad> {
        Arc::new_cyclic(|this| Pad {
            name,
            direction,
            template,
            this: this.clone(),
            parent: RwLock::new(Weak::new()),
            state: Mutex::new(PadState::default()),
            flushing: AtomicBool::new(true),
            flags: AtomicU32::new(0),
            stream_lock: Mutex::new(()),
            handlers: RwLock::new(Handlers::default()),
            probes: Mutex::new(Vec::new()),
            flush_targets: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> Handlers {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_handlers(&self, f: impl FnOnce(&mut Handlers)) {
        f(&mut self.handlers.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Pad name, unique within its element.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `element:pad`, or the bare pad name for free pads.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}:{}", parent.name(), self.name),
            None => self.name.clone(),
        }
    }

    /// Direction.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Template the pad was created from.
    pub fn template(&self) -> Option<&PadTemplate> {
        self.template.as_ref()
    }

    /// Template caps, ANY for pads without template.
    pub fn template_caps(&self) -> Caps {
        self.template
            .as_ref()
            .map_or_else(Caps::new_any, |t| t.caps().clone())
    }

    /// Owning element.
    pub fn parent(&self) -> Option<Arc<Element>> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<Element>) {
        *self.parent.write().unwrap_or_else(PoisonError::into_inner) = parent;
    }

    pub(crate) fn has_parent(&self) -> bool {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }

    /// Linked peer.
    pub fn peer(&self) -> Option<Arc<Pad>> {
        self.lock_state().peer.upgrade()
    }

    /// True if linked.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Current scheduling mode.
    pub fn mode(&self) -> PadMode {
        self.lock_state().mode
    }

    /// True if activated in push or pull mode.
    pub fn is_active(&self) -> bool {
        self.mode() != PadMode::None
    }

    /// True while flushing (always true for inactive pads).
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// True once EOS passed this pad.
    pub fn is_eos(&self) -> bool {
        self.lock_state().eos
    }

    /// Negotiated caps.
    pub fn current_caps(&self) -> Option<Caps> {
        self.lock_state().caps.clone()
    }

    /// True once the pad negotiated, with caps or through ANY.
    pub fn is_negotiated(&self) -> bool {
        self.lock_state().negotiated
    }

    /// Stored sticky event of type `ty`.
    pub fn sticky_event(&self, ty: EventType) -> Option<Event> {
        self.lock_state()
            .sticky
            .iter()
            .find(|e| e.event_type() == ty)
            .cloned()
    }

    /// All stored sticky events, in sticky order.
    pub fn sticky_events(&self) -> Vec<Event> {
        self.lock_state().sticky.clone()
    }

    /// Result of the last push, chain or pull.
    pub fn last_flow_result(&self) -> Option<FlowReturn> {
        self.lock_state().last_flow
    }

    fn set_last_flow(&self, result: &FlowResult) {
        self.lock_state().last_flow = Some(FlowReturn::from(*result));
    }

    /// Current flags.
    pub fn flags(&self) -> PadFlags {
        PadFlags(self.flags.load(Ordering::SeqCst))
    }

    /// Set flags.
    pub fn set_flags(&self, flags: PadFlags) {
        self.flags.fetch_or(flags.0, Ordering::SeqCst);
    }

    /// Clear flags.
    pub fn unset_flags(&self, flags: PadFlags) {
        self.flags.fetch_and(!flags.0, Ordering::SeqCst);
    }

    /// True if all of `flags` are set.
    pub fn has_flags(&self, flags: PadFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Request renegotiation on the next push.
    pub fn mark_reconfigure(&self) {
        self.set_flags(PadFlags::NEED_RECONFIGURE);
    }

    /// True if renegotiation is pending.
    pub fn needs_reconfigure(&self) -> bool {
        self.has_flags(PadFlags::NEED_RECONFIGURE)
    }

    /// Test and clear the reconfigure flag.
    pub fn check_reconfigure(&self) -> bool {
        let prev = self
            .flags
            .fetch_and(!PadFlags::NEED_RECONFIGURE.0, Ordering::SeqCst);
        PadFlags(prev).contains(PadFlags::NEED_RECONFIGURE)
    }

    /// Hold the stream lock, pausing this pad's streaming.
    pub fn stream_lock(&self) -> MutexGuard<'_, ()> {
        self.stream_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    /// Install the chain handler.
    pub fn set_chain_function<F>(&self, f: F)
    where
        F: Fn(&Pad, Buffer) -> FlowResult + Send + Sync + 'static,
    {
        self.update_handlers(|h| h.chain = Some(Arc::new(f)));
    }

    /// Install the chain-list handler.
    pub fn set_chain_list_function<F>(&self, f: F)
    where
        F: Fn(&Pad, BufferList) -> FlowResult + Send + Sync + 'static,
    {
        self.update_handlers(|h| h.chain_list = Some(Arc::new(f)));
    }

    /// Install the getrange handler.
    pub fn set_getrange_function<F>(&self, f: F)
    where
        F: Fn(&Pad, u64, usize) -> Result<Buffer, FlowError> + Send + Sync + 'static,
    {
        self.update_handlers(|h| h.getrange = Some(Arc::new(f)));
    }

    /// Install the event handler.
    pub fn set_event_function<F>(&self, f: F)
    where
        F: Fn(&Pad, Event) -> bool + Send + Sync + 'static,
    {
        self.update_handlers(|h| h.event = Some(Arc::new(f)));
    }

    /// Install the query handler.
    pub fn set_query_function<F>(&self, f: F)
    where
        F: Fn(&Pad, &mut Query) -> bool + Send + Sync + 'static,
    {
        self.update_handlers(|h| h.query = Some(Arc::new(f)));
    }

    /// Install the activation handler.
    pub fn set_activate_mode_function<F>(&self, f: F)
    where
        F: Fn(&Pad, PadMode, bool) -> bool + Send + Sync + 'static,
    {
        self.update_handlers(|h| h.activate_mode = Some(Arc::new(f)));
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Link this source pad to `sink`.
    ///
    /// Checks, in order: directions, existing links, hierarchy (both
    /// elements must live in the same container) and caps compatibility.
    /// Sticky events stored on this pad are replayed to `sink` before the
    /// next buffer or event.
    pub fn link(&self, sink: &Pad) -> Result<(), PadLinkError> {
        if self.direction != PadDirection::Src || sink.direction != PadDirection::Sink {
            return Err(PadLinkError::WrongDirection);
        }
        if self.is_linked() || sink.is_linked() {
            return Err(PadLinkError::WasLinked);
        }
        self.check_hierarchy(sink)?;

        let src_caps = self.query_caps(None);
        let sink_caps = sink.query_caps(None);
        if !src_caps.can_intersect(&sink_caps) {
            debug!(src = %self.path(), sink = %sink.path(), %src_caps, %sink_caps, "link refused: no common format");
            return Err(PadLinkError::NoFormat);
        }

        {
            let mut src_state = self.lock_state();
            let mut sink_state = sink.lock_state();
            if src_state.peer.strong_count() > 0 || sink_state.peer.strong_count() > 0 {
                return Err(PadLinkError::WasLinked);
            }
            src_state.peer = sink.this.clone();
            sink_state.peer = self.this.clone();
            src_state.caps = None;
            src_state.negotiated = false;
            src_state.replay_sticky = !src_state.sticky.is_empty();
        }
        debug!(src = %self.path(), sink = %sink.path(), "linked");
        Ok(())
    }

    fn check_hierarchy(&self, sink: &Pad) -> Result<(), PadLinkError> {
        let (Some(src_parent), Some(sink_parent)) = (self.parent(), sink.parent()) else {
            return Ok(());
        };
        if Arc::ptr_eq(&src_parent, &sink_parent) {
            return Ok(());
        }
        match (src_parent.parent(), sink_parent.parent()) {
            (None, None) => Ok(()),
            (Some(a), Some(b)) if Arc::ptr_eq(&a, &b) => Ok(()),
            _ => Err(PadLinkError::WrongHierarchy),
        }
    }

    /// Unlink this source pad from `sink`. Clears negotiated caps on both
    /// ends. Returns false if the pads were not linked to each other.
    pub fn unlink(&self, sink: &Pad) -> bool {
        if self.direction != PadDirection::Src {
            return false;
        }
        {
            let mut src_state = self.lock_state();
            let mut sink_state = sink.lock_state();
            let linked = src_state
                .peer
                .upgrade()
                .is_some_and(|p| std::ptr::eq(Arc::as_ptr(&p), sink));
            if !linked {
                return false;
            }
            src_state.peer = Weak::new();
            sink_state.peer = Weak::new();
            src_state.caps = None;
            src_state.negotiated = false;
            sink_state.caps = None;
            sink_state.negotiated = false;
            sink_state.remove_sticky(EventType::Caps);
        }
        debug!(src = %self.path(), sink = %sink.path(), "unlinked");
        true
    }

    /// Unlink from whatever peer this pad has.
    pub fn unlink_peer(&self) -> bool {
        let Some(peer) = self.peer() else {
            return false;
        };
        match self.direction {
            PadDirection::Src => self.unlink(&peer),
            PadDirection::Sink => peer.unlink(self),
        }
    }

    // ------------------------------------------------------------------------
    // Activation and flushing
    // ------------------------------------------------------------------------

    /// Activate in push mode, or deactivate.
    pub fn set_active(&self, active: bool) -> bool {
        if active {
            self.activate_mode(PadMode::Push, true)
        } else {
            match self.mode() {
                PadMode::None => true,
                mode => self.activate_mode(mode, false),
            }
        }
    }

    /// Activate or deactivate a scheduling mode.
    ///
    /// Activating a sink pad in pull mode activates its peer too.
    /// Deactivation flushes registered flush targets, waits for the
    /// streaming thread to leave the pad and drops sticky events.
    pub fn activate_mode(&self, mode: PadMode, active: bool) -> bool {
        if mode == PadMode::None {
            return self.set_active(false);
        }
        let current = self.mode();
        if active {
            if current == mode {
                return true;
            }
            if current != PadMode::None && !self.activate_mode(current, false) {
                return false;
            }
            if self.direction == PadDirection::Sink && mode == PadMode::Pull {
                let Some(peer) = self.peer() else {
                    warn!(pad = %self.path(), "cannot activate pull mode without peer");
                    return false;
                };
                if !peer.activate_mode(PadMode::Pull, true) {
                    return false;
                }
            }
            self.lock_state().mode = mode;
            self.flushing.store(false, Ordering::SeqCst);
            self.flush_targets_stop();
            if !self.call_activate_mode(mode, true) {
                warn!(pad = %self.path(), ?mode, "activation refused");
                self.flushing.store(true, Ordering::SeqCst);
                self.lock_state().mode = PadMode::None;
                return false;
            }
            debug!(pad = %self.path(), ?mode, "activated");
            true
        } else {
            if current != mode {
                return true;
            }
            self.start_flushing();
            let ok = self.call_activate_mode(mode, false);
            drop(self.stream_lock());
            {
                let mut state = self.lock_state();
                state.mode = PadMode::None;
                state.sticky.clear();
                state.replay_sticky = false;
                state.eos = false;
                state.caps = None;
                state.negotiated = false;
            }
            if self.direction == PadDirection::Sink && mode == PadMode::Pull {
                if let Some(peer) = self.peer() {
                    peer.activate_mode(PadMode::Pull, false);
                }
            }
            debug!(pad = %self.path(), ?mode, "deactivated");
            ok
        }
    }

    fn call_activate_mode(&self, mode: PadMode, active: bool) -> bool {
        if let Some(f) = self.handlers().activate_mode {
            return f(self, mode, active);
        }
        match self.parent() {
            Some(parent) => parent.imp_dyn().activate_mode(&parent, self, mode, active),
            None => true,
        }
    }

    /// Register a blocking waiter that flushing must interrupt.
    pub fn add_flush_target<T: FlushTarget + 'static>(&self, target: &Arc<T>) -> FlushTargetId {
        let id = FlushTargetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let weak: Weak<dyn FlushTarget> = Arc::downgrade(target) as Weak<dyn FlushTarget>;
        self.flush_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, weak));
        if self.is_flushing() {
            target.flush_start();
        }
        id
    }

    /// Unregister a flush target.
    pub fn remove_flush_target(&self, id: FlushTargetId) -> bool {
        let mut targets = self
            .flush_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = targets.len();
        targets.retain(|(tid, _)| *tid != id);
        targets.len() != before
    }

    fn live_flush_targets(&self) -> Vec<Arc<dyn FlushTarget>> {
        let mut targets = self
            .flush_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        targets.retain(|(_, t)| t.strong_count() > 0);
        targets.iter().filter_map(|(_, t)| t.upgrade()).collect()
    }

    fn flush_targets_stop(&self) {
        for target in self.live_flush_targets() {
            target.flush_stop();
        }
    }

    fn start_flushing(&self) {
        self.flushing.store(true, Ordering::SeqCst);
        let targets = self.live_flush_targets();
        trace!(pad = %self.path(), targets = targets.len(), "flush start");
        for target in targets {
            target.flush_start();
        }
    }

    fn stop_flushing(&self) {
        let mut state = self.lock_state();
        state.eos = false;
        state.remove_sticky(EventType::Eos);
        state.remove_sticky(EventType::Segment);
        if state.mode == PadMode::None {
            return;
        }
        drop(state);
        self.flushing.store(false, Ordering::SeqCst);
        self.flush_targets_stop();
        trace!(pad = %self.path(), "flush stop");
    }

    // ------------------------------------------------------------------------
    // Probes
    // ------------------------------------------------------------------------

    /// Install a probe. It runs on data passing this pad in either role
    /// (pushing or receiving).
    pub fn add_probe<F>(&self, mask: PadProbeType, callback: F) -> ProbeId
    where
        F: Fn(&Pad, &PadProbeInfo<'_>) -> PadProbeReturn + Send + Sync + 'static,
    {
        let id = ProbeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: ProbeCallback = Arc::new(callback);
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Probe { id, mask, callback });
        id
    }

    /// Remove a probe.
    pub fn remove_probe(&self, id: ProbeId) -> bool {
        let mut probes = self.probes.lock().unwrap_or_else(PoisonError::into_inner);
        let before = probes.len();
        probes.retain(|p| p.id != id);
        probes.len() != before
    }

    fn run_probes(&self, traffic: PadProbeType, data: PadProbeData<'_>) -> ProbeOutcome {
        let matching: Vec<(ProbeId, ProbeCallback)> = self
            .probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| p.mask.wants(traffic))
            .map(|p| (p.id, p.callback.clone()))
            .collect();
        let info = PadProbeInfo { mask: traffic, data };
        for (id, callback) in matching {
            match callback(self, &info) {
                PadProbeReturn::Ok => {}
                PadProbeReturn::Remove => {
                    self.remove_probe(id);
                }
                PadProbeReturn::Drop => {
                    trace!(pad = %self.path(), "probe dropped data");
                    return ProbeOutcome::Drop;
                }
                PadProbeReturn::Handled => return ProbeOutcome::Handled,
            }
        }
        ProbeOutcome::Pass
    }

    // ------------------------------------------------------------------------
    // Push mode
    // ------------------------------------------------------------------------

    /// Push a buffer to the peer's chain handler.
    ///
    /// The buffer is consumed: on every error path it is dropped exactly
    /// once.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        self.push_data(PadData::Buffer(buffer))
    }

    /// Push a list of buffers as one unit. Falls back to per-buffer chain
    /// calls when the peer has no list handler.
    pub fn push_list(&self, list: BufferList) -> FlowResult {
        self.push_data(PadData::List(list))
    }

    fn push_data(&self, data: PadData) -> FlowResult {
        if self.direction != PadDirection::Src {
            warn!(pad = %self.path(), "push on a sink pad");
            return Err(FlowError::NotSupported);
        }
        let _stream = self.stream_lock();
        let result = self.push_data_locked(data);
        self.set_last_flow(&result);
        if let Err(err) = result {
            trace!(pad = %self.path(), flow = %err, "push failed");
        }
        result
    }

    fn push_data_locked(&self, data: PadData) -> FlowResult {
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        let (peer, eos) = {
            let state = self.lock_state();
            (state.peer.upgrade(), state.eos)
        };
        if eos {
            return Err(FlowError::Eos);
        }
        match self.run_probes(data.probe_type() | PadProbeType::PUSH, data.probe_data()) {
            ProbeOutcome::Pass => {}
            ProbeOutcome::Drop | ProbeOutcome::Handled => return Ok(FlowSuccess::Ok),
        }
        let Some(peer) = peer else {
            return Err(FlowError::NotLinked);
        };
        self.replay_sticky_locked(&peer, None)?;
        let needs_negotiation = !self.lock_state().negotiated || self.needs_reconfigure();
        if needs_negotiation {
            self.negotiate_locked(&peer)?;
        }
        peer.chain_data(data)
    }

    /// Deliver a buffer into this sink pad, as if pushed by the peer.
    pub fn chain(&self, buffer: Buffer) -> FlowResult {
        self.chain_data(PadData::Buffer(buffer))
    }

    /// Deliver a buffer list into this sink pad.
    pub fn chain_list(&self, list: BufferList) -> FlowResult {
        self.chain_data(PadData::List(list))
    }

    fn chain_data(&self, data: PadData) -> FlowResult {
        if self.direction != PadDirection::Sink {
            return Err(FlowError::NotSupported);
        }
        let _stream = self.stream_lock();
        let result = self.chain_data_locked(data);
        self.set_last_flow(&result);
        result
    }

    fn chain_data_locked(&self, data: PadData) -> FlowResult {
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        if self.lock_state().eos {
            return Err(FlowError::Eos);
        }
        match self.run_probes(data.probe_type() | PadProbeType::PUSH, data.probe_data()) {
            ProbeOutcome::Pass => {}
            ProbeOutcome::Drop | ProbeOutcome::Handled => return Ok(FlowSuccess::Ok),
        }
        let handlers = self.handlers();
        match data {
            PadData::Buffer(buffer) => self.dispatch_chain(&handlers, buffer),
            PadData::List(list) => {
                if let Some(f) = &handlers.chain_list {
                    return f(self, list);
                }
                if handlers.chain.is_none() {
                    if let Some(parent) = self.parent() {
                        return parent.imp_dyn().chain_list(&parent, self, list);
                    }
                }
                let mut last = Ok(FlowSuccess::Ok);
                for buffer in list.into_buffers() {
                    last = Ok(self.dispatch_chain(&handlers, buffer)?);
                }
                last
            }
        }
    }

    fn dispatch_chain(&self, handlers: &Handlers, buffer: Buffer) -> FlowResult {
        if let Some(f) = &handlers.chain {
            return f(self, buffer);
        }
        match self.parent() {
            Some(parent) => parent.imp_dyn().chain(&parent, self, buffer),
            None => Err(FlowError::NotSupported),
        }
    }

    // ------------------------------------------------------------------------
    // Pull mode
    // ------------------------------------------------------------------------

    /// Pull `size` bytes at `offset` from the peer's getrange handler.
    ///
    /// A flush during the call makes it return `Flushing` even if the peer
    /// produced data.
    pub fn pull_range(&self, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        if self.direction != PadDirection::Sink {
            return Err(FlowError::NotSupported);
        }
        let _stream = self.stream_lock();
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        let (peer, mode) = {
            let state = self.lock_state();
            (state.peer.upgrade(), state.mode)
        };
        let Some(peer) = peer else {
            return Err(FlowError::NotLinked);
        };
        if mode != PadMode::Pull {
            return Err(FlowError::NotSupported);
        }
        let result = peer.get_range(offset, size);
        let result = if self.is_flushing() {
            Err(FlowError::Flushing)
        } else {
            result
        };
        if let Ok(buffer) = &result {
            // Pull probes observe only.
            self.run_probes(
                PadProbeType::BUFFER | PadProbeType::PULL,
                PadProbeData::Buffer(buffer),
            );
        }
        self.set_last_flow(&result.as_ref().map(|_| FlowSuccess::Ok).map_err(|e| *e));
        result
    }

    /// Run this source pad's getrange handler.
    pub fn get_range(&self, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        if self.direction != PadDirection::Src {
            return Err(FlowError::NotSupported);
        }
        let _stream = self.stream_lock();
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        if let Some(f) = self.handlers().getrange {
            return f(self, offset, size);
        }
        match self.parent() {
            Some(parent) => parent.imp_dyn().get_range(&parent, self, offset, size),
            None => Err(FlowError::NotSupported),
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Send an event to the peer.
    ///
    /// Downstream events go out of source pads, upstream events out of sink
    /// pads. FLUSH-START and FLUSH-STOP also flush this pad. Sticky events
    /// are stored and count as handled when the pad is not linked yet.
    pub fn push_event(&self, event: Event) -> bool {
        let ty = event.event_type();
        let allowed = match self.direction {
            PadDirection::Src => ty.is_downstream(),
            PadDirection::Sink => ty.is_upstream(),
        };
        if !allowed {
            warn!(pad = %self.path(), event = %ty, "event pushed in the wrong direction");
            return false;
        }
        match ty {
            EventType::FlushStart => self.start_flushing(),
            EventType::FlushStop => self.stop_flushing(),
            _ => {}
        }
        if ty.is_serialized() && self.direction == PadDirection::Src {
            let _stream = self.stream_lock();
            self.push_event_locked(event)
        } else {
            self.push_event_locked(event)
        }
    }

    fn push_event_locked(&self, event: Event) -> bool {
        let ty = event.event_type();
        let is_flush = matches!(ty, EventType::FlushStart | EventType::FlushStop);
        if !is_flush && self.is_flushing() {
            trace!(pad = %self.path(), event = %ty, "pad flushing, event refused");
            return false;
        }
        let downstream = self.direction == PadDirection::Src;
        let peer = {
            let mut state = self.lock_state();
            if downstream && ty.is_sticky() {
                state.store_sticky(event.clone());
                if ty == EventType::Eos {
                    state.eos = true;
                }
            }
            state.peer.upgrade()
        };
        let traffic = if downstream {
            PadProbeType::EVENT_DOWNSTREAM
        } else {
            PadProbeType::EVENT_UPSTREAM
        };
        match self.run_probes(traffic | PadProbeType::PUSH, PadProbeData::Event(&event)) {
            ProbeOutcome::Pass => {}
            ProbeOutcome::Drop | ProbeOutcome::Handled => return true,
        }
        let Some(peer) = peer else {
            return downstream && ty.is_sticky();
        };
        if downstream && self.replay_sticky_locked(&peer, Some(ty)).is_err() {
            return false;
        }
        trace!(pad = %self.path(), event = %ty, seqnum = event.seqnum(), "pushing event");
        let accepted = peer.send_event(event.clone());
        if downstream {
            if let EventView::Caps(caps) = event.view() {
                let mut state = self.lock_state();
                if accepted {
                    state.caps = Some(caps.clone());
                    state.negotiated = true;
                } else {
                    state.remove_sticky(EventType::Caps);
                }
            }
        }
        accepted
    }

    /// Deliver stored sticky events to a new peer. With `before`, only
    /// events ordered before that sticky type are sent.
    fn replay_sticky_locked(&self, peer: &Pad, before: Option<EventType>) -> Result<(), FlowError> {
        let events = {
            let mut state = self.lock_state();
            if !state.replay_sticky {
                return Ok(());
            }
            state.replay_sticky = false;
            let limit = before.and_then(EventType::sticky_order);
            state
                .sticky
                .iter()
                .filter(|e| limit.is_none() || e.event_type().sticky_order() < limit)
                .cloned()
                .collect::<Vec<_>>()
        };
        for event in events {
            trace!(pad = %self.path(), event = %event.event_type(), "replaying sticky event");
            let accepted = peer.send_event(event.clone());
            if let EventView::Caps(caps) = event.view() {
                if !accepted {
                    self.lock_state().remove_sticky(EventType::Caps);
                    self.not_negotiated(caps, &peer.query_caps(Some(caps)));
                    return Err(FlowError::NotNegotiated);
                }
                let mut state = self.lock_state();
                state.caps = Some(caps.clone());
                state.negotiated = true;
            }
        }
        Ok(())
    }

    /// Receive an event as if sent by the peer, and run this pad's event
    /// handler.
    pub fn send_event(&self, event: Event) -> bool {
        let ty = event.event_type();
        let allowed = match self.direction {
            PadDirection::Sink => ty.is_downstream(),
            PadDirection::Src => ty.is_upstream(),
        };
        if !allowed {
            warn!(pad = %self.path(), event = %ty, "event received in the wrong direction");
            return false;
        }
        match ty {
            EventType::FlushStart => self.start_flushing(),
            EventType::FlushStop => {
                if !self.is_active() {
                    return false;
                }
                self.stop_flushing();
            }
            _ if self.is_flushing() => {
                trace!(pad = %self.path(), event = %ty, "pad flushing, event dropped");
                return false;
            }
            _ => {}
        }
        let serialized_here = ty.is_serialized() && self.direction == PadDirection::Sink;
        let _stream = serialized_here.then(|| self.stream_lock());

        if self.direction == PadDirection::Sink {
            if let EventView::Caps(caps) = event.view() {
                if !self.query_accept_caps(caps) {
                    debug!(pad = %self.path(), %caps, "caps not accepted");
                    return false;
                }
            }
            let mut state = self.lock_state();
            if let EventView::Caps(caps) = event.view() {
                state.caps = Some(caps.clone());
                state.negotiated = true;
            }
            if ty == EventType::Eos {
                state.eos = true;
            }
            if ty.is_sticky() {
                state.store_sticky(event.clone());
            }
        } else if ty == EventType::Reconfigure {
            self.mark_reconfigure();
        }

        let traffic = if self.direction == PadDirection::Sink {
            PadProbeType::EVENT_DOWNSTREAM
        } else {
            PadProbeType::EVENT_UPSTREAM
        };
        match self.run_probes(traffic | PadProbeType::PUSH, PadProbeData::Event(&event)) {
            ProbeOutcome::Pass => {}
            ProbeOutcome::Drop | ProbeOutcome::Handled => return true,
        }
        self.dispatch_event(event)
    }

    fn dispatch_event(&self, event: Event) -> bool {
        if let Some(f) = self.handlers().event {
            return f(self, event);
        }
        match self.parent() {
            Some(parent) => match self.direction {
                PadDirection::Sink => parent.imp_dyn().sink_event(&parent, self, event),
                PadDirection::Src => parent.imp_dyn().src_event(&parent, self, event),
            },
            None => self.event_default(event),
        }
    }

    /// Default event handling: forward through every pad of the parent
    /// element with the opposite direction.
    ///
    /// Events reaching a sink pad of an element without source pads are
    /// considered handled; upstream events reaching a source element are
    /// not.
    pub fn event_default(&self, event: Event) -> bool {
        let targets = self.opposite_pads();
        if targets.is_empty() {
            return self.direction == PadDirection::Sink;
        }
        let mut handled = false;
        for pad in targets {
            handled |= pad.push_event(event.clone());
        }
        handled
    }

    fn opposite_pads(&self) -> Vec<Arc<Pad>> {
        match self.parent() {
            Some(parent) => parent
                .pads()
                .into_iter()
                .filter(|p| p.direction != self.direction)
                .collect(),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Queries and negotiation
    // ------------------------------------------------------------------------

    /// Run a query on this pad.
    pub fn query(&self, query: &mut Query) -> bool {
        if let Some(f) = self.handlers().query {
            return f(self, query);
        }
        match self.parent() {
            Some(parent) => parent.imp_dyn().query(&parent, self, query),
            None => self.query_default(query),
        }
    }

    /// Run a query on the peer. False if not linked.
    pub fn peer_query(&self, query: &mut Query) -> bool {
        match self.peer() {
            Some(peer) => peer.query(query),
            None => false,
        }
    }

    /// Default query handling.
    ///
    /// CAPS answers the template caps, filtered, and for PROXY_CAPS pads
    /// intersected with what the peers of the element's opposite pads
    /// allow. ACCEPT-CAPS checks the caps are a subset of the CAPS answer.
    /// SCHEDULING answers push, plus pull if a getrange handler is set.
    /// Other queries are forwarded to the peers of the opposite pads.
    pub fn query_default(&self, query: &mut Query) -> bool {
        match query.query_type() {
            QueryType::Caps => {
                let filter = query.caps_filter().cloned();
                let result = self.default_caps(filter.as_ref());
                query.set_caps_result(result);
                true
            }
            QueryType::AcceptCaps => {
                let Some(caps) = query.accept_caps_caps().cloned() else {
                    return false;
                };
                let allowed = self.query_caps(Some(&caps));
                query.set_accept_caps_result(caps.is_subset(&allowed));
                true
            }
            QueryType::Scheduling if self.direction == PadDirection::Src => {
                let pull = self.handlers().getrange.is_some();
                let modes: &[PadMode] = if pull {
                    &[PadMode::Push, PadMode::Pull]
                } else {
                    &[PadMode::Push]
                };
                query.set_scheduling(modes, pull);
                true
            }
            _ => self
                .opposite_pads()
                .iter()
                .any(|pad| pad.peer_query(query)),
        }
    }

    fn default_caps(&self, filter: Option<&Caps>) -> Caps {
        let template = self.template_caps();
        let mut caps = match filter {
            Some(filter) => filter.intersect(&template),
            None => template,
        };
        if self.has_flags(PadFlags::PROXY_CAPS) {
            for pad in self.opposite_pads() {
                let allowed = pad.peer_query_caps(Some(&caps));
                caps = caps.intersect(&allowed);
            }
        }
        caps
    }

    /// Caps this pad can handle, restricted to `filter` in its order.
    pub fn query_caps(&self, filter: Option<&Caps>) -> Caps {
        let mut query = Query::caps(filter.cloned());
        if self.query(&mut query) {
            if let Some(result) = query.caps_result() {
                return result.clone();
            }
        }
        match filter {
            Some(filter) => filter.intersect(&self.template_caps()),
            None => self.template_caps(),
        }
    }

    /// Caps the peer can handle. Unlinked pads answer the filter, or ANY.
    pub fn peer_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.peer() {
            Some(peer) => peer.query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::new_any),
        }
    }

    /// Caps both this pad and its peer can handle. `None` if unlinked.
    pub fn allowed_caps(&self) -> Option<Caps> {
        let peer = self.peer()?;
        let mine = self.query_caps(None);
        let theirs = peer.query_caps(Some(&mine));
        Some(mine.intersect(&theirs))
    }

    /// True if this pad accepts `caps`.
    pub fn query_accept_caps(&self, caps: &Caps) -> bool {
        let mut query = Query::accept_caps(caps.clone());
        self.query(&mut query) && query.accept_caps_result()
    }

    /// True if the peer accepts `caps`. False if unlinked.
    pub fn peer_query_accept_caps(&self, caps: &Caps) -> bool {
        self.peer().is_some_and(|peer| peer.query_accept_caps(caps))
    }

    /// Set caps explicitly: pushed downstream from a source pad, received
    /// from the peer on a sink pad.
    pub fn set_caps(&self, caps: Caps) -> bool {
        match self.direction {
            PadDirection::Src => self.push_event(Event::caps(caps)),
            PadDirection::Sink => self.send_event(Event::caps(caps)),
        }
    }

    /// Negotiate now instead of on the next push.
    pub fn negotiate(&self) -> bool {
        if self.direction != PadDirection::Src {
            return false;
        }
        let _stream = self.stream_lock();
        let Some(peer) = self.peer() else {
            return false;
        };
        self.replay_sticky_locked(&peer, None).is_ok() && self.negotiate_locked(&peer).is_ok()
    }

    fn negotiate_locked(&self, peer: &Pad) -> Result<(), FlowError> {
        self.unset_flags(PadFlags::NEED_RECONFIGURE);
        let ours = self.query_caps(None);
        let theirs = peer.query_caps(Some(&ours));
        let common = ours.intersect(&theirs);
        debug!(pad = %self.path(), %ours, %theirs, %common, "negotiating");

        if common.is_any() {
            self.lock_state().negotiated = true;
            return Ok(());
        }
        let Some(fixed) = common.fixate() else {
            self.not_negotiated(&ours, &theirs);
            return Err(FlowError::NotNegotiated);
        };
        if !self.push_event_locked(Event::caps(fixed.clone())) {
            self.not_negotiated(&fixed, &theirs);
            return Err(FlowError::NotNegotiated);
        }
        Ok(())
    }

    fn not_negotiated(&self, ours: &Caps, theirs: &Caps) {
        warn!(pad = %self.path(), %ours, %theirs, "not negotiated");
        if let Some(parent) = self.parent() {
            parent.post_error(
                ErrorKind::Stream(StreamError::NotNegotiated),
                format!("{}: no common format with peer", self.path()),
                Some(format!("ours: {ours}; theirs: {theirs}")),
            );
        }
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("flushing", &self.is_flushing())
            .finish()
    }
}
