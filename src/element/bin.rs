//! Bins: elements that contain other elements.
//!
//! A bin forwards every state change to its children before completing its
//! own, in sink-first order so that downstream elements are ready before
//! upstream ones start pushing (and are flushed first when stopping). The
//! order is a topological sort of the child link graph.
//!
//! Child results aggregate as Failure > Async > NoPreroll > Success. When
//! children answer Async, the bin's step completes once the last of them
//! posts its final STATE-CHANGED message.
//!
//! The bin also aggregates EOS: it posts a single EOS of its own once every
//! sink child (a child without source pads) has posted EOS.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use daggy::{Dag, NodeIndex};
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{Message, MessageView};

use super::{Element, ElementImpl, State, StateChange, StateChangeReturn};

#[derive(Default)]
struct BinState {
    pending_async: Vec<String>,
    eos: HashSet<String>,
    eos_posted: bool,
}

/// Container implementation shared by bins and pipelines.
#[derive(Default)]
pub struct Bin {
    children: RwLock<Vec<Arc<Element>>>,
    state: Mutex<BinState>,
}

impl Bin {
    /// Empty container state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bin element.
    pub fn create(name: impl Into<String>) -> Result<Arc<Element>> {
        Element::new(name, Bin::new())
    }

    fn lock_state(&self) -> MutexGuard<'_, BinState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<Arc<Element>> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Child by name, searching nested bins too.
    pub fn by_name(&self, name: &str) -> Option<Arc<Element>> {
        let children = self.children();
        if let Some(child) = children.iter().find(|c| c.name() == name) {
            return Some(child.clone());
        }
        children
            .iter()
            .filter_map(|c| c.as_bin().and_then(|b| b.by_name(name)))
            .next()
    }

    fn add(&self, bin: &Element, child: &Arc<Element>) -> Result<()> {
        if std::ptr::eq(Arc::as_ptr(child), bin) {
            return Err(Error::InvalidName(format!("{} cannot contain itself", bin.name())));
        }
        if child.parent().is_some() {
            return Err(Error::AlreadyParented(child.name().to_string()));
        }
        {
            let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
            if children.iter().any(|c| c.name() == child.name()) {
                return Err(Error::InvalidName(format!(
                    "{} already has a child named {}",
                    bin.name(),
                    child.name()
                )));
            }
            child.set_parent(bin.downgrade());
            children.push(child.clone());
        }
        debug!(bin = %bin.name(), child = %child.name(), "child added");
        Ok(())
    }

    fn remove(&self, bin: &Element, child: &Element) -> Result<()> {
        let removed = {
            let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
            let Some(pos) = children
                .iter()
                .position(|c| std::ptr::eq(Arc::as_ptr(c), child))
            else {
                return Err(Error::NotFound(format!("{} in {}", child.name(), bin.name())));
            };
            children.remove(pos)
        };
        for pad in removed.pads() {
            pad.unlink_peer();
        }
        removed.set_parent(Weak::new());
        {
            let mut state = self.lock_state();
            state.pending_async.retain(|n| n != removed.name());
            state.eos.remove(removed.name());
        }
        debug!(bin = %bin.name(), child = %removed.name(), "child removed");
        Ok(())
    }

    /// Children ordered sink-first: every element comes before the elements
    /// linked upstream of it.
    pub fn sorted_children(&self) -> Vec<Arc<Element>> {
        let children = self.children();
        let mut dag: Dag<usize, ()> = Dag::new();
        let nodes: Vec<NodeIndex> = (0..children.len()).map(|i| dag.add_node(i)).collect();

        for (upstream, child) in children.iter().enumerate() {
            for pad in child.src_pads() {
                let Some(peer_parent) = pad.peer().and_then(|peer| peer.parent()) else {
                    continue;
                };
                let Some(downstream) = children.iter().position(|c| Arc::ptr_eq(c, &peer_parent)) else {
                    continue;
                };
                // Edge downstream -> upstream: the sink side changes first.
                if dag
                    .add_edge(nodes[downstream], nodes[upstream], ())
                    .is_err()
                {
                    trace!(child = %child.name(), "link loop, ignoring edge");
                }
            }
        }

        match daggy::petgraph::algo::toposort(dag.graph(), None) {
            Ok(order) => order.into_iter().map(|n| children[dag[n]].clone()).collect(),
            Err(_) => children,
        }
    }

    fn sink_children(&self) -> Vec<Arc<Element>> {
        self.children()
            .into_iter()
            .filter(|c| c.src_pads().is_empty())
            .collect()
    }

    fn source_children(&self) -> Vec<Arc<Element>> {
        self.children()
            .into_iter()
            .filter(|c| c.sink_pads().is_empty())
            .collect()
    }

    fn change_children(&self, bin: &Element, transition: StateChange) -> StateChangeReturn {
        let next = transition.next();
        {
            let mut state = self.lock_state();
            state.pending_async.clear();
            if matches!(transition, StateChange::ReadyToPaused | StateChange::PausedToReady) {
                state.eos.clear();
                state.eos_posted = false;
            }
        }

        let mut settled = StateChangeReturn::Success;
        let mut async_children = Vec::new();
        for child in self.sorted_children() {
            if child.is_locked_state() {
                trace!(bin = %bin.name(), child = %child.name(), "skipping locked child");
                continue;
            }
            let ret = child.set_state(next);
            trace!(bin = %bin.name(), child = %child.name(), %ret, "child state change");
            match ret {
                StateChangeReturn::Failure => {
                    warn!(bin = %bin.name(), child = %child.name(), %transition, "child failed to change state");
                    return StateChangeReturn::Failure;
                }
                StateChangeReturn::Async => async_children.push(child),
                other => settled = settled.combine(other),
            }
        }
        if async_children.is_empty() {
            return settled;
        }

        self.lock_state().pending_async = async_children.iter().map(|c| c.name().to_string()).collect();
        // Children may have completed before they were recorded as pending.
        let finished: Vec<String> = async_children
            .iter()
            .filter(|c| c.get_state(Some(Duration::ZERO)).0 != StateChangeReturn::Async)
            .map(|c| c.name().to_string())
            .collect();
        let mut state = self.lock_state();
        state.pending_async.retain(|n| !finished.contains(n));
        if state.pending_async.is_empty() {
            return settled;
        }
        debug!(bin = %bin.name(), pending = ?state.pending_async, "waiting for async children");
        StateChangeReturn::Async
    }

    fn handle_child_message(&self, bin: &Element, message: Message) {
        match message.view() {
            MessageView::StateChanged {
                pending: State::VoidPending,
                ..
            } => {
                let completed = message.src_name().is_some_and(|name| {
                    let mut state = self.lock_state();
                    let before = state.pending_async.len();
                    state.pending_async.retain(|n| n != name);
                    before > 0 && state.pending_async.is_empty()
                });
                bin.post_message(message);
                if completed {
                    debug!(bin = %bin.name(), "async children done");
                    bin.continue_state(StateChangeReturn::Success);
                }
            }
            MessageView::Eos => {
                let Some(name) = message.src_name() else {
                    return;
                };
                let sinks = self.sink_children();
                let complete = {
                    let mut state = self.lock_state();
                    state.eos.insert(name.to_string());
                    let all = sinks.iter().all(|s| state.eos.contains(s.name()));
                    let complete = all && !state.eos_posted;
                    if complete {
                        state.eos_posted = true;
                    }
                    complete
                };
                trace!(bin = %bin.name(), child = name, complete, "child eos");
                if complete {
                    debug!(bin = %bin.name(), "all sinks reached eos");
                    bin.post_message(Message::eos(Some(bin)));
                }
            }
            MessageView::Error(_) => {
                let had_pending = {
                    let mut state = self.lock_state();
                    let had = !state.pending_async.is_empty();
                    state.pending_async.clear();
                    had
                };
                bin.post_message(message);
                if had_pending {
                    bin.abort_state();
                }
            }
            _ => {
                bin.post_message(message);
            }
        }
    }

    fn send_event_to_children(&self, event: Event) -> bool {
        let targets = if event.is_upstream() {
            self.sink_children()
        } else {
            self.source_children()
        };
        let mut handled = false;
        for child in targets {
            handled |= child.send_event(event.clone());
        }
        handled
    }

    /// Clock of the most upstream child that provides one.
    fn children_clock(&self) -> Option<Arc<dyn Clock>> {
        self.sorted_children()
            .iter()
            .filter_map(|c| c.provide_clock())
            .last()
    }
}

impl ElementImpl for Bin {
    fn constructed(&self, _element: &Element) -> Result<()> {
        Ok(())
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        self.change_children(element, transition)
    }

    fn handle_message(&self, element: &Element, message: Message) {
        self.handle_child_message(element, message);
    }

    fn send_event(&self, _element: &Element, event: Event) -> bool {
        self.send_event_to_children(event)
    }

    fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        self.children_clock()
    }

    fn bin(&self) -> Option<&Bin> {
        Some(self)
    }
}

// Container operations on the element handle.
impl Element {
    fn require_bin(&self) -> Result<&Bin> {
        self.as_bin().ok_or_else(|| Error::NotABin(self.name().to_string()))
    }

    /// Add a child element.
    pub fn add(&self, child: &Arc<Element>) -> Result<()> {
        self.require_bin()?.add(self, child)
    }

    /// Add several children.
    pub fn add_many(&self, children: &[&Arc<Element>]) -> Result<()> {
        for child in children {
            self.add(child)?;
        }
        Ok(())
    }

    /// Remove a child, unlinking its pads.
    pub fn remove(&self, child: &Element) -> Result<()> {
        self.require_bin()?.remove(self, child)
    }

    /// Children of a bin; empty for other elements.
    pub fn children(&self) -> Vec<Arc<Element>> {
        self.as_bin().map(Bin::children).unwrap_or_default()
    }

    /// Child by name, searching nested bins.
    pub fn by_name(&self, name: &str) -> Option<Arc<Element>> {
        self.as_bin().and_then(|b| b.by_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use crate::pad::{PadDirection, PadPresence, PadTemplate};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Node {
        src: bool,
        sink: bool,
        log: Log,
        deferred: bool,
    }

    impl Node {
        fn new(src: bool, sink: bool, log: &Log) -> Self {
            Self {
                src,
                sink,
                log: log.clone(),
                deferred: false,
            }
        }
    }

    impl ElementImpl for Node {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            let mut templates = Vec::new();
            if self.sink {
                templates.push(
                    PadTemplate::new("sink", PadDirection::Sink, PadPresence::Always, Caps::new_any()).unwrap(),
                );
            }
            if self.src {
                templates.push(
                    PadTemplate::new("src", PadDirection::Src, PadPresence::Always, Caps::new_any()).unwrap(),
                );
            }
            templates
        }

        fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", element.name(), transition));
            if self.deferred && transition == StateChange::ReadyToPaused {
                StateChangeReturn::Async
            } else {
                StateChangeReturn::Success
            }
        }
    }

    fn chain(log: &Log) -> (Arc<Element>, Arc<Element>, Arc<Element>, Arc<Element>) {
        let bin = Bin::create("bin").unwrap();
        let src = Element::new("src", Node::new(true, false, log)).unwrap();
        let filter = Element::new("filter", Node::new(true, true, log)).unwrap();
        let sink = Element::new("sink", Node::new(false, true, log)).unwrap();
        // Insert upstream-first; ordering must not depend on it.
        bin.add_many(&[&src, &filter, &sink]).unwrap();
        Element::link_many(&[&*src, &*filter, &*sink]).unwrap();
        (bin, src, filter, sink)
    }

    #[test]
    fn test_sink_first_order() {
        let log = Log::default();
        let (bin, ..) = chain(&log);
        let names: Vec<String> = bin
            .as_bin()
            .unwrap()
            .sorted_children()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, ["sink", "filter", "src"]);

        assert_eq!(bin.set_state(State::Ready), StateChangeReturn::Success);
        assert_eq!(
            *log.lock().unwrap(),
            ["sink:NULL->READY", "filter:NULL->READY", "src:NULL->READY"]
        );
    }

    #[test]
    fn test_async_child_completes_bin() {
        let log = Log::default();
        let bin = Bin::create("bin").unwrap();
        let a = Element::new("a", Node::new(false, false, &log)).unwrap();
        let b = Element::new(
            "b",
            Node {
                deferred: true,
                ..Node::new(false, false, &log)
            },
        )
        .unwrap();
        let c = Element::new("c", Node::new(false, false, &log)).unwrap();
        bin.add_many(&[&a, &b, &c]).unwrap();

        assert_eq!(bin.set_state(State::Paused), StateChangeReturn::Async);
        assert_eq!(bin.current_state(), State::Ready);
        assert_eq!(a.current_state(), State::Paused);
        assert_eq!(b.current_state(), State::Ready);

        assert_eq!(b.continue_state(StateChangeReturn::Success), StateChangeReturn::Success);
        assert_eq!(b.current_state(), State::Paused);
        let (ret, current, pending) = bin.get_state(Some(Duration::from_secs(1)));
        assert_eq!(ret, StateChangeReturn::Success);
        assert_eq!(current, State::Paused);
        assert_eq!(pending, State::VoidPending);
    }

    #[test]
    fn test_failing_child_fails_bin() {
        struct Broken;
        impl ElementImpl for Broken {
            fn change_state(&self, _e: &Element, t: StateChange) -> StateChangeReturn {
                if t == StateChange::ReadyToPaused {
                    StateChangeReturn::Failure
                } else {
                    StateChangeReturn::Success
                }
            }
        }
        let bin = Bin::create("bin").unwrap();
        let broken = Element::new("broken", Broken).unwrap();
        bin.add(&broken).unwrap();
        assert_eq!(bin.set_state(State::Playing), StateChangeReturn::Failure);
        assert_eq!(bin.current_state(), State::Ready);
        assert_eq!(broken.current_state(), State::Ready);
    }

    #[test]
    fn test_locked_child_is_skipped() {
        let log = Log::default();
        let (bin, src, ..) = chain(&log);
        src.set_locked_state(true);
        bin.set_state(State::Ready);
        assert_eq!(src.current_state(), State::Null);
    }

    #[test]
    fn test_eos_aggregation() {
        let log = Log::default();
        let bin = Bin::create("bin").unwrap();
        let s1 = Element::new("s1", Node::new(false, true, &log)).unwrap();
        let s2 = Element::new("s2", Node::new(false, true, &log)).unwrap();
        bin.add_many(&[&s1, &s2]).unwrap();

        let imp = bin.as_bin().unwrap();
        s1.post_message(Message::eos(Some(&*s1)));
        assert!(!imp.lock_state().eos_posted);
        s2.post_message(Message::eos(Some(&*s2)));
        assert!(imp.lock_state().eos_posted);
    }

    #[test]
    fn test_add_remove_children() {
        let log = Log::default();
        let (bin, src, filter, sink) = chain(&log);
        assert!(matches!(bin.add(&src), Err(Error::AlreadyParented(_))));
        let other = Bin::create("other").unwrap();
        assert!(matches!(other.add(&src), Err(Error::AlreadyParented(_))));
        assert!(matches!(src.add(&sink), Err(Error::NotABin(_))));

        assert!(Arc::ptr_eq(&bin.by_name("filter").unwrap(), &filter));
        bin.remove(&filter).unwrap();
        assert!(filter.parent().is_none());
        assert!(!src.static_pad("src").unwrap().is_linked());
        assert_eq!(bin.children().len(), 2);
    }
}
