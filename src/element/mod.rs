//! Elements: named, stateful processing nodes owning pads.
//!
//! An [`Element`] is a shared handle (`Arc<Element>`) around a boxed
//! [`ElementImpl`]. The implementation supplies behaviour (pad templates,
//! chain/getrange/event/query handling, state change hooks); the handle
//! owns the generic machinery: the pad list, the state machine and message
//! posting.
//!
//! # State machine
//!
//! ```text
//! NULL <-> READY <-> PAUSED <-> PLAYING
//! ```
//!
//! [`Element::set_state`] walks one step at a time towards the target and
//! posts a STATE-CHANGED message for every completed step. READY→PAUSED
//! activates the pads, PAUSED→READY deactivates them (which unblocks every
//! streaming thread inside the element). A step returning
//! [`StateChangeReturn::Async`] completes later through
//! [`Element::continue_state`]; a failed step leaves the element at the
//! last fully reached state and posts an ERROR message.
//!
//! Containers are elements whose implementation is a [`Bin`]; see
//! [`bin`](self::Bin) for child ordering and async aggregation.

mod bin;
mod factory;
mod pipeline;
mod property;
mod state;

pub use bin::Bin;
pub use factory::{ElementConstructor, ElementRegistry, construct};
pub use pipeline::{Pipeline, PipelineConfig};
pub use property::{Properties, PropertyValue};
pub use state::{State, StateChange, StateChangeReturn};

pub(crate) use property::unknown_property;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::buffer::{Buffer, BufferList};
use crate::bus::Bus;
use crate::clock::{Clock, ClockTime, PipelineClock};
use crate::error::{Error, PadLinkError, Result, StateError};
use crate::event::Event;
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::message::{CoreError, ErrorKind, ErrorMessage, Message, MessageView, StreamError};
use crate::object::name_is_valid;
use crate::pad::{Pad, PadDirection, PadMode, PadPresence, PadTemplate};
use crate::query::Query;

// ============================================================================
// ElementImpl
// ============================================================================

/// Downcasting support for element implementations.
pub trait AsAny {
    /// `self` as `Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Behaviour of a concrete element kind.
///
/// Every method has a default, so an implementation only overrides what
/// it needs. Pad-level methods receive the owning element and the pad the
/// traffic arrived on.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use padline::buffer::Buffer;
/// use padline::caps::Caps;
/// use padline::element::{Element, ElementImpl};
/// use padline::flow::{FlowResult, FlowSuccess};
/// use padline::pad::{Pad, PadDirection, PadPresence, PadTemplate};
///
/// struct Counter(std::sync::atomic::AtomicUsize);
///
/// impl ElementImpl for Counter {
///     fn pad_templates(&self) -> Vec<PadTemplate> {
///         vec![PadTemplate::new("sink", PadDirection::Sink, PadPresence::Always, Caps::new_any()).unwrap()]
///     }
///
///     fn chain(&self, _element: &Element, _pad: &Pad, _buffer: Buffer) -> FlowResult {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         Ok(FlowSuccess::Ok)
///     }
/// }
///
/// let element = Element::new("counter", Counter(Default::default())).unwrap();
/// assert!(element.static_pad("sink").is_some());
/// ```
pub trait ElementImpl: AsAny + Send + Sync + 'static {
    /// Pad templates of this element kind.
    fn pad_templates(&self) -> Vec<PadTemplate> {
        Vec::new()
    }

    /// Called once after the element handle exists. The default creates
    /// one pad per ALWAYS template.
    fn constructed(&self, element: &Element) -> Result<()> {
        element.add_always_pads()
    }

    /// Run a single transition step. Pads are already activated for
    /// READY→PAUSED and already deactivated for PAUSED→READY.
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        let _ = (element, transition);
        StateChangeReturn::Success
    }

    /// Handle a buffer arriving on a sink pad.
    fn chain(&self, element: &Element, pad: &Pad, buffer: Buffer) -> FlowResult {
        let _ = (element, pad, buffer);
        Err(FlowError::NotSupported)
    }

    /// Handle a buffer list. The default chains every buffer.
    fn chain_list(&self, element: &Element, pad: &Pad, list: BufferList) -> FlowResult {
        for buffer in list.into_buffers() {
            self.chain(element, pad, buffer)?;
        }
        Ok(FlowSuccess::Ok)
    }

    /// Produce data for a pull on a source pad.
    fn get_range(&self, element: &Element, pad: &Pad, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        let _ = (element, pad, offset, size);
        Err(FlowError::NotSupported)
    }

    /// Handle a downstream event on a sink pad.
    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        let _ = element;
        pad.event_default(event)
    }

    /// Handle an upstream event on a source pad.
    fn src_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        let _ = element;
        pad.event_default(event)
    }

    /// Answer a query on one of the element's pads.
    fn query(&self, element: &Element, pad: &Pad, query: &mut Query) -> bool {
        let _ = element;
        pad.query_default(query)
    }

    /// Pad activation hook (start or stop streaming tasks here).
    fn activate_mode(&self, element: &Element, pad: &Pad, mode: PadMode, active: bool) -> bool {
        let _ = (element, pad, mode, active);
        true
    }

    /// Create a pad for a REQUEST template. The element adds it.
    fn request_new_pad(&self, element: &Element, template: &PadTemplate, name: Option<&str>) -> Option<Arc<Pad>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => element.next_pad_name(template),
        };
        Some(Pad::from_template(template, name))
    }

    /// A request pad is about to be removed.
    fn release_pad(&self, element: &Element, pad: &Pad) {
        let _ = (element, pad);
    }

    /// Clock this element can provide to the pipeline.
    fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        None
    }

    /// Set a property.
    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let _ = (element, value);
        Err(unknown_property(name))
    }

    /// Read a property.
    fn property(&self, name: &str) -> Option<PropertyValue> {
        let _ = name;
        None
    }

    /// Message posted by a child. Only containers receive these; the
    /// default forwards it upwards.
    fn handle_message(&self, element: &Element, message: Message) {
        element.post_message(message);
    }

    /// Event injected into the element by the application.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.send_event_default(event)
    }

    /// Bus of a top-level element.
    fn bus(&self) -> Option<Bus> {
        None
    }

    /// Clock of a top-level element.
    fn pipeline_clock(&self) -> Option<Arc<PipelineClock>> {
        None
    }

    /// Container state, for bins and pipelines.
    fn bin(&self) -> Option<&Bin> {
        None
    }
}

// ============================================================================
// Element
// ============================================================================

type PadCallback = Arc<dyn Fn(&Element, &Arc<Pad>) + Send + Sync>;
type ElementCallback = Arc<dyn Fn(&Element) + Send + Sync>;

#[derive(Default)]
struct Signals {
    pad_added: Vec<PadCallback>,
    pad_removed: Vec<PadCallback>,
    no_more_pads: Vec<ElementCallback>,
}

#[derive(Debug)]
struct StateData {
    current: State,
    next: State,
    pending: State,
    last_return: StateChangeReturn,
    locked: bool,
    in_step: bool,
    async_done: Option<StateChangeReturn>,
}

impl Default for StateData {
    fn default() -> Self {
        Self {
            current: State::Null,
            next: State::VoidPending,
            pending: State::VoidPending,
            last_return: StateChangeReturn::Success,
            locked: false,
            in_step: false,
            async_done: None,
        }
    }
}

impl StateData {
    fn async_in_progress(&self) -> bool {
        self.next != State::VoidPending && self.last_return == StateChangeReturn::Async
    }
}

/// A processing node: pads, state and an [`ElementImpl`].
pub struct Element {
    name: String,
    this: Weak<Element>,
    imp: Box<dyn ElementImpl>,
    parent: RwLock<Weak<Element>>,
    pads: RwLock<Vec<Arc<Pad>>>,
    pad_index: AtomicU32,
    state: Mutex<StateData>,
    state_cond: Condvar,
    signals: Mutex<Signals>,
}

impl Element {
    /// Create an element around `imp`.
    pub fn new<T: ElementImpl>(name: impl Into<String>, imp: T) -> Result<Arc<Element>> {
        Self::from_box(name.into(), Box::new(imp))
    }

    fn from_box(name: String, imp: Box<dyn ElementImpl>) -> Result<Arc<Element>> {
        if !name_is_valid(&name) {
            return Err(Error::InvalidName(name));
        }
        let element = Arc::new_cyclic(|this| Element {
            name,
            this: this.clone(),
            imp,
            parent: RwLock::new(Weak::new()),
            pads: RwLock::new(Vec::new()),
            pad_index: AtomicU32::new(0),
            state: Mutex::new(StateData::default()),
            state_cond: Condvar::new(),
            signals: Mutex::new(Signals::default()),
        });
        element.imp.constructed(&element)?;
        trace!(element = %element.name, "created");
        Ok(element)
    }

    /// Element name, unique within its container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Weak handle to this element.
    pub fn downgrade(&self) -> Weak<Element> {
        self.this.clone()
    }

    /// Strong handle to this element.
    pub fn to_arc(&self) -> Option<Arc<Element>> {
        self.this.upgrade()
    }

    /// The implementation, if it is a `T`.
    pub fn imp<T: ElementImpl>(&self) -> Option<&T> {
        <dyn ElementImpl as AsAny>::as_any(&*self.imp).downcast_ref::<T>()
    }

    pub(crate) fn imp_dyn(&self) -> &dyn ElementImpl {
        &*self.imp
    }

    /// Containing bin.
    pub fn parent(&self) -> Option<Arc<Element>> {
        self.parent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<Element>) {
        *self.parent.write().unwrap_or_else(PoisonError::into_inner) = parent;
    }

    /// Container state, if this element is a bin or pipeline.
    pub fn as_bin(&self) -> Option<&Bin> {
        self.imp.bin()
    }

    // ------------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------------

    /// Pad templates of this element.
    pub fn pad_templates(&self) -> Vec<PadTemplate> {
        self.imp.pad_templates()
    }

    /// Template with the given name pattern.
    pub fn pad_template(&self, name: &str) -> Option<PadTemplate> {
        self.pad_templates()
            .into_iter()
            .find(|t| t.name_template() == name)
    }

    /// Create the pads of every ALWAYS template.
    pub fn add_always_pads(&self) -> Result<()> {
        for template in self.pad_templates() {
            if template.presence() == PadPresence::Always {
                self.add_pad(Pad::from_template(&template, template.name_template()))?;
            }
        }
        Ok(())
    }

    /// All pads, in creation order.
    pub fn pads(&self) -> Vec<Arc<Pad>> {
        self.pads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Source pads.
    pub fn src_pads(&self) -> Vec<Arc<Pad>> {
        self.pads_with_direction(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Arc<Pad>> {
        self.pads_with_direction(PadDirection::Sink)
    }

    fn pads_with_direction(&self, direction: PadDirection) -> Vec<Arc<Pad>> {
        self.pads()
            .into_iter()
            .filter(|p| p.direction() == direction)
            .collect()
    }

    /// Pad by name.
    pub fn static_pad(&self, name: &str) -> Option<Arc<Pad>> {
        self.pads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub(crate) fn next_pad_name(&self, template: &PadTemplate) -> String {
        loop {
            let index = self.pad_index.fetch_add(1, Ordering::Relaxed);
            let name = template.instance_name(index);
            if self.static_pad(&name).is_none() {
                return name;
            }
        }
    }

    /// Add a pad. Pads added to a PAUSED or PLAYING element are activated.
    pub fn add_pad(&self, pad: Arc<Pad>) -> Result<()> {
        if !name_is_valid(pad.name()) {
            return Err(Error::InvalidName(pad.name().to_string()));
        }
        if pad.has_parent() {
            return Err(Error::AlreadyParented(pad.name().to_string()));
        }
        {
            let mut pads = self.pads.write().unwrap_or_else(PoisonError::into_inner);
            if pads.iter().any(|p| p.name() == pad.name()) {
                return Err(Error::InvalidName(format!("{}:{}", self.name, pad.name())));
            }
            pad.set_parent(self.this.clone());
            pads.push(pad.clone());
        }
        if self.current_state() >= State::Paused && !pad.set_active(true) {
            warn!(element = %self.name, pad = %pad.name(), "could not activate added pad");
        }
        debug!(element = %self.name, pad = %pad.name(), direction = ?pad.direction(), "pad added");
        let callbacks = self.lock_signals().pad_added.clone();
        for callback in callbacks {
            callback(self, &pad);
        }
        Ok(())
    }

    /// Remove a pad: unlink, deactivate and detach it.
    pub fn remove_pad(&self, pad: &Pad) -> Result<()> {
        let removed = {
            let mut pads = self.pads.write().unwrap_or_else(PoisonError::into_inner);
            let Some(pos) = pads.iter().position(|p| std::ptr::eq(Arc::as_ptr(p), pad)) else {
                return Err(Error::NotFound(format!("{}:{}", self.name, pad.name())));
            };
            pads.remove(pos)
        };
        removed.unlink_peer();
        removed.set_active(false);
        removed.set_parent(Weak::new());
        debug!(element = %self.name, pad = %removed.name(), "pad removed");
        let callbacks = self.lock_signals().pad_removed.clone();
        for callback in callbacks {
            callback(self, &removed);
        }
        Ok(())
    }

    /// Create and add a pad from the REQUEST template `template`.
    pub fn request_pad(&self, template: &str, name: Option<&str>) -> Option<Arc<Pad>> {
        let template = self
            .pad_templates()
            .into_iter()
            .find(|t| t.presence() == PadPresence::Request && t.name_template() == template)?;
        if let Some(name) = name {
            if !template.matches(name) || self.static_pad(name).is_some() {
                return None;
            }
        }
        let pad = self.imp.request_new_pad(self, &template, name)?;
        match self.add_pad(pad.clone()) {
            Ok(()) => Some(pad),
            Err(err) => {
                warn!(element = %self.name, error = %err, "requested pad rejected");
                None
            }
        }
    }

    fn request_pad_for(&self, direction: PadDirection, name: Option<&str>) -> Option<Arc<Pad>> {
        let template = self.pad_templates().into_iter().find(|t| {
            t.presence() == PadPresence::Request
                && t.direction() == direction
                && name.is_none_or(|n| t.matches(n))
        })?;
        self.request_pad(template.name_template(), name)
    }

    /// Release a pad obtained with [`request_pad`](Self::request_pad).
    pub fn release_request_pad(&self, pad: &Pad) -> Result<()> {
        let is_request = pad
            .template()
            .is_some_and(|t| t.presence() == PadPresence::Request);
        if !is_request {
            return Err(Error::PadTemplate {
                template: pad.name().to_string(),
                reason: "not a request pad".to_string(),
            });
        }
        self.imp.release_pad(self, pad);
        self.remove_pad(pad)
    }

    /// Signal that no more SOMETIMES pads will be added.
    pub fn no_more_pads(&self) {
        debug!(element = %self.name, "no more pads");
        let callbacks = self.lock_signals().no_more_pads.clone();
        for callback in callbacks {
            callback(self);
        }
    }

    fn lock_signals(&self) -> MutexGuard<'_, Signals> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called after a pad was added.
    pub fn connect_pad_added<F>(&self, f: F)
    where
        F: Fn(&Element, &Arc<Pad>) + Send + Sync + 'static,
    {
        self.lock_signals().pad_added.push(Arc::new(f));
    }

    /// Called after a pad was removed.
    pub fn connect_pad_removed<F>(&self, f: F)
    where
        F: Fn(&Element, &Arc<Pad>) + Send + Sync + 'static,
    {
        self.lock_signals().pad_removed.push(Arc::new(f));
    }

    /// Called by [`no_more_pads`](Self::no_more_pads).
    pub fn connect_no_more_pads<F>(&self, f: F)
    where
        F: Fn(&Element) + Send + Sync + 'static,
    {
        self.lock_signals().no_more_pads.push(Arc::new(f));
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Link the first compatible free source pad to a free sink pad of
    /// `dest`, requesting pads where templates allow it.
    pub fn link(&self, dest: &Element) -> Result<()> {
        self.link_pads(None, dest, None)
    }

    /// Link named pads, or any compatible pads where a name is `None`.
    pub fn link_pads(&self, src_pad: Option<&str>, dest: &Element, sink_pad: Option<&str>) -> Result<()> {
        let (srcs, src_requested) = self.link_candidates(PadDirection::Src, src_pad);
        let (sinks, sink_requested) = dest.link_candidates(PadDirection::Sink, sink_pad);
        if srcs.is_empty() || sinks.is_empty() {
            self.release_unlinked(src_requested);
            dest.release_unlinked(sink_requested);
            return Err(Error::NotFound(format!(
                "no free pads to link {} to {}",
                self.name, dest.name
            )));
        }
        let mut last_err = PadLinkError::NoFormat;
        for src in &srcs {
            for sink in &sinks {
                match src.link(sink) {
                    Ok(()) => {
                        self.release_unlinked(src_requested);
                        dest.release_unlinked(sink_requested);
                        return Ok(());
                    }
                    Err(err) => last_err = err,
                }
            }
        }
        self.release_unlinked(src_requested);
        dest.release_unlinked(sink_requested);
        debug!(src = %self.name, sink = %dest.name, error = %last_err, "link failed");
        Err(Error::PadLink(last_err))
    }

    fn link_candidates(&self, direction: PadDirection, name: Option<&str>) -> (Vec<Arc<Pad>>, Option<Arc<Pad>>) {
        if let Some(name) = name {
            if let Some(pad) = self.static_pad(name) {
                let free = (pad.direction() == direction && !pad.is_linked()).then_some(pad);
                return (free.into_iter().collect(), None);
            }
            let requested = self.request_pad_for(direction, Some(name));
            return (requested.iter().cloned().collect(), requested);
        }
        let free: Vec<_> = self
            .pads_with_direction(direction)
            .into_iter()
            .filter(|p| !p.is_linked())
            .collect();
        if !free.is_empty() {
            return (free, None);
        }
        let requested = self.request_pad_for(direction, None);
        (requested.iter().cloned().collect(), requested)
    }

    fn release_unlinked(&self, requested: Option<Arc<Pad>>) {
        if let Some(pad) = requested {
            if !pad.is_linked() {
                let _ = self.release_request_pad(&pad);
            }
        }
    }

    /// Link each element to the next.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    /// Unlink every source pad of this element linked to `dest`.
    pub fn unlink(&self, dest: &Element) {
        for pad in self.src_pads() {
            let Some(peer) = pad.peer() else {
                continue;
            };
            let to_dest = peer
                .parent()
                .is_some_and(|p| std::ptr::eq(Arc::as_ptr(&p), dest));
            if to_dest {
                pad.unlink(&peer);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Properties and events
    // ------------------------------------------------------------------------

    /// Set a property.
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        trace!(element = %self.name, property = name, value = ?value, "set property");
        self.imp.set_property(self, name, &value)
    }

    /// Read a property.
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.imp.property(name)
    }

    /// Inject an event into the element.
    pub fn send_event(&self, event: Event) -> bool {
        self.imp.send_event(self, event)
    }

    /// Default event injection: upstream events enter through a source
    /// pad, downstream events through a sink pad, as if sent by a peer.
    pub fn send_event_default(&self, event: Event) -> bool {
        let direction = if event.is_upstream() {
            PadDirection::Src
        } else {
            PadDirection::Sink
        };
        match self.pads_with_direction(direction).first() {
            Some(pad) => pad.send_event(event),
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Messages, bus and clock
    // ------------------------------------------------------------------------

    /// Post a message: to the parent bin, or to the bus of a top-level
    /// element. Returns false if the message was dropped.
    pub fn post_message(&self, message: Message) -> bool {
        if let Some(parent) = self.parent() {
            parent.imp.handle_message(&parent, message);
            return true;
        }
        match self.imp.bus() {
            Some(bus) => bus.post(message),
            None => {
                trace!(element = %self.name, msg = message.message_type().name(), "no bus, message dropped");
                false
            }
        }
    }

    /// Post an ERROR message from this element.
    pub fn post_error(&self, kind: ErrorKind, text: impl Into<String>, debug: Option<String>) {
        let text = text.into();
        error!(element = %self.name, %kind, %text, "error");
        let mut err = ErrorMessage::new(kind, text);
        if let Some(debug) = debug {
            err = err.with_debug(debug);
        }
        self.post_message(Message::new(Some(self), MessageView::Error(err)));
    }

    /// Post a WARNING message from this element.
    pub fn post_warning(&self, kind: ErrorKind, text: impl Into<String>) {
        let text = text.into();
        warn!(element = %self.name, %kind, %text, "warning");
        self.post_message(Message::warning(Some(self), kind, text));
    }

    /// Report a streaming failure. Fatal results post an ERROR message;
    /// orderly ones (EOS, flushing) are only logged.
    pub fn flow_error(&self, err: FlowError) {
        if !err.is_fatal() {
            debug!(element = %self.name, flow = %err, "streaming stopped");
            return;
        }
        let kind = match err {
            FlowError::NotNegotiated => ErrorKind::Stream(StreamError::NotNegotiated),
            _ => ErrorKind::Stream(StreamError::Failed),
        };
        self.post_error(kind, format!("internal data stream error: {err}"), None);
    }

    /// Bus of the top-level element this element lives in.
    pub fn bus(&self) -> Option<Bus> {
        self.imp.bus().or_else(|| self.parent().and_then(|p| p.bus()))
    }

    /// Clock and base time of the enclosing pipeline.
    pub fn pipeline_clock(&self) -> Option<Arc<PipelineClock>> {
        self.imp
            .pipeline_clock()
            .or_else(|| self.parent().and_then(|p| p.pipeline_clock()))
    }

    /// Base time, `NONE` outside a playing pipeline.
    pub fn base_time(&self) -> ClockTime {
        self.pipeline_clock()
            .map_or(ClockTime::NONE, |c| c.base_time())
    }

    /// Running time of the enclosing pipeline.
    pub fn running_time(&self) -> ClockTime {
        self.pipeline_clock()
            .map_or(ClockTime::NONE, |c| c.running_time())
    }

    /// Clock this element provides.
    pub fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        self.imp.provide_clock()
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, StateData> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn current_state(&self) -> State {
        self.lock_state().current
    }

    /// Final target of an ongoing change, `VoidPending` if none.
    pub fn pending_state(&self) -> State {
        self.lock_state().pending
    }

    /// Locked elements ignore state changes of their bin.
    pub fn set_locked_state(&self, locked: bool) -> bool {
        let mut state = self.lock_state();
        let changed = state.locked != locked;
        state.locked = locked;
        changed
    }

    /// True if locked.
    pub fn is_locked_state(&self) -> bool {
        self.lock_state().locked
    }

    /// Change state, one step at a time.
    ///
    /// Returns `Async` when a step completes later; [`get_state`](Self::get_state)
    /// waits for it.
    pub fn set_state(&self, target: State) -> StateChangeReturn {
        if target == State::VoidPending {
            return StateChangeReturn::Failure;
        }
        {
            let mut state = self.lock_state();
            if state.async_in_progress() {
                if state.pending == target {
                    return StateChangeReturn::Async;
                }
                debug!(element = %self.name, from = %state.current, %target, "abandoning async change");
                state.next = State::VoidPending;
            }
            if state.current == target && !state.in_step {
                state.pending = State::VoidPending;
                state.last_return = StateChangeReturn::Success;
                self.state_cond.notify_all();
                return StateChangeReturn::Success;
            }
            state.pending = target;
        }
        debug!(element = %self.name, %target, "set state");
        self.continue_steps()
    }

    fn continue_steps(&self) -> StateChangeReturn {
        let mut result = StateChangeReturn::Success;
        loop {
            let transition = {
                let mut state = self.lock_state();
                let target = state.pending;
                if target == State::VoidPending || state.current == target {
                    state.pending = State::VoidPending;
                    state.next = State::VoidPending;
                    state.last_return = result;
                    self.state_cond.notify_all();
                    return result;
                }
                let next = state.current.step_towards(target);
                let Some(transition) = StateChange::new(state.current, next) else {
                    return StateChangeReturn::Failure;
                };
                state.next = next;
                state.in_step = true;
                state.async_done = None;
                transition
            };

            let ret = self.change_state_step(transition);
            let ret = {
                let mut state = self.lock_state();
                state.in_step = false;
                match (ret, state.async_done.take()) {
                    (StateChangeReturn::Async, Some(done)) => done,
                    (ret, _) => ret,
                }
            };

            match ret {
                StateChangeReturn::Failure => {
                    self.fail_state(transition);
                    return StateChangeReturn::Failure;
                }
                StateChangeReturn::Async => {
                    let mut state = self.lock_state();
                    state.last_return = StateChangeReturn::Async;
                    debug!(element = %self.name, %transition, "state change async");
                    self.state_cond.notify_all();
                    return StateChangeReturn::Async;
                }
                StateChangeReturn::Success | StateChangeReturn::NoPreroll => {
                    self.commit_state(transition, ret);
                    result = ret;
                }
            }
        }
    }

    fn change_state_step(&self, transition: StateChange) -> StateChangeReturn {
        match transition {
            StateChange::ReadyToPaused => {
                if !self.activate_pads(true) {
                    self.activate_pads(false);
                    return StateChangeReturn::Failure;
                }
                let ret = self.imp.change_state(self, transition);
                if ret == StateChangeReturn::Failure {
                    self.activate_pads(false);
                }
                ret
            }
            StateChange::PausedToReady => {
                if !self.activate_pads(false) {
                    return StateChangeReturn::Failure;
                }
                self.imp.change_state(self, transition)
            }
            _ => self.imp.change_state(self, transition),
        }
    }

    fn activate_pads(&self, active: bool) -> bool {
        let mut ok = true;
        for pad in self.src_pads().into_iter().chain(self.sink_pads()) {
            if !pad.set_active(active) {
                warn!(element = %self.name, pad = %pad.name(), active, "pad activation failed");
                ok = false;
                if active {
                    break;
                }
            }
        }
        ok
    }

    fn commit_state(&self, transition: StateChange, ret: StateChangeReturn) {
        let (old, current, pending) = {
            let mut state = self.lock_state();
            let old = state.current;
            state.current = transition.next();
            state.next = State::VoidPending;
            if state.pending == state.current {
                state.pending = State::VoidPending;
            }
            state.last_return = ret;
            self.state_cond.notify_all();
            (old, state.current, state.pending)
        };
        debug!(element = %self.name, %old, %current, %pending, "state changed");
        self.post_message(Message::state_changed(Some(self), old, current, pending));
    }

    fn fail_state(&self, transition: StateChange) {
        {
            let mut state = self.lock_state();
            state.next = State::VoidPending;
            state.pending = State::VoidPending;
            state.last_return = StateChangeReturn::Failure;
            self.state_cond.notify_all();
        }
        let err = StateError::ChangeFailed {
            element: self.name.clone(),
            transition: transition.to_string(),
        };
        self.post_error(ErrorKind::Core(CoreError::StateChange), err.to_string(), None);
    }

    /// Complete an async step with `ret` and continue towards the target.
    pub fn continue_state(&self, ret: StateChangeReturn) -> StateChangeReturn {
        let transition = {
            let mut state = self.lock_state();
            if state.next == State::VoidPending {
                return state.last_return;
            }
            if state.in_step {
                state.async_done = Some(ret);
                return ret;
            }
            if state.last_return != StateChangeReturn::Async {
                return state.last_return;
            }
            match StateChange::new(state.current, state.next) {
                Some(transition) => transition,
                None => return StateChangeReturn::Failure,
            }
        };
        debug!(element = %self.name, %transition, %ret, "continue state");
        match ret {
            StateChangeReturn::Failure => {
                self.fail_state(transition);
                StateChangeReturn::Failure
            }
            StateChangeReturn::Async => StateChangeReturn::Async,
            StateChangeReturn::Success | StateChangeReturn::NoPreroll => {
                self.commit_state(transition, ret);
                let result = self.continue_steps();
                if self.parent().is_none() {
                    let running_time = self.running_time();
                    self.post_message(Message::new(Some(self), MessageView::AsyncDone { running_time }));
                }
                result
            }
        }
    }

    /// Cancel an async step without completing it.
    pub fn abort_state(&self) {
        let mut state = self.lock_state();
        if state.next == State::VoidPending {
            return;
        }
        warn!(element = %self.name, current = %state.current, next = %state.next, "aborting state change");
        state.next = State::VoidPending;
        state.pending = State::VoidPending;
        state.last_return = StateChangeReturn::Failure;
        self.state_cond.notify_all();
    }

    /// Result, current and pending state, waiting up to `timeout` for an
    /// async change to finish (`None` waits forever).
    pub fn get_state(&self, timeout: Option<Duration>) -> (StateChangeReturn, State, State) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock_state();
        loop {
            if !state.async_in_progress() {
                return (state.last_return, state.current, state.pending);
            }
            match deadline {
                None => {
                    state = self
                        .state_cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (StateChangeReturn::Async, state.current, state.pending);
                    }
                    state = self
                        .state_cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Move to the state (or pending state) of the parent bin.
    pub fn sync_state_with_parent(&self) -> bool {
        let Some(parent) = self.parent() else {
            return false;
        };
        let (_, current, pending) = parent.get_state(Some(Duration::ZERO));
        let target = if pending != State::VoidPending { pending } else { current };
        self.set_state(target) != StateChangeReturn::Failure
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .field("pads", &self.pads().len())
            .finish()
    }
}
