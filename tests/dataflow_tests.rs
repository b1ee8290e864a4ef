//! Pad-level data flow: linking, negotiation, sticky events, probes,
//! pull scheduling and flushing.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use padline::buffer::Buffer;
use padline::bus::Bus;
use padline::caps::{Caps, CapsValue};
use padline::dataqueue::{DataQueue, DataQueueLimits};
use padline::element::{Element, ElementImpl, Pipeline};
use padline::error::PadLinkError;
use padline::event::{Event, EventType};
use padline::flow::{FlowError, FlowSuccess};
use padline::message::{ErrorKind, Message, MessageType, StreamError};
use padline::pad::{Pad, PadDirection, PadMode, PadPresence, PadProbeReturn, PadProbeType, PadTemplate};

fn linked_pair() -> (Arc<Pad>, Arc<Pad>) {
    let src = Pad::new("src", PadDirection::Src);
    let sink = Pad::new("sink", PadDirection::Sink);
    src.link(&sink).unwrap();
    assert!(sink.set_active(true));
    assert!(src.set_active(true));
    (src, sink)
}

fn templated(name: &str, direction: PadDirection, caps: &str) -> Arc<Pad> {
    let caps = Caps::from_str(caps).unwrap();
    let template = PadTemplate::new(name, direction, PadPresence::Always, caps).unwrap();
    Pad::from_template(&template, name)
}

#[test]
fn test_unlinked_push_releases_buffer() {
    let src = Pad::new("src", PadDirection::Src);
    assert!(src.set_active(true));

    let buffer = Buffer::from_slice(b"abcd");
    let witness = buffer.clone();
    assert_eq!(src.push(buffer), Err(FlowError::NotLinked));
    assert_eq!(witness.ref_count(), 1);
}

#[test]
fn test_chain_receives_sole_reference() {
    let (src, sink) = linked_pair();
    let received = Arc::new(Mutex::new(None));
    let slot = received.clone();
    sink.set_chain_function(move |_, buffer| {
        *slot.lock().unwrap() = Some((buffer.map_readable().as_slice().to_vec(), buffer.ref_count(), buffer.is_writable()));
        Ok(FlowSuccess::Ok)
    });

    assert_eq!(src.push(Buffer::from_slice(&[9, 8, 7, 6])), Ok(FlowSuccess::Ok));
    assert_eq!(*received.lock().unwrap(), Some((vec![9, 8, 7, 6], 1, true)));
}

#[test]
fn test_negotiation_picks_the_fixed_rate() {
    let src = templated("src", PadDirection::Src, "audio/x-raw, rate=(int)[ 8000, 48000 ], channels=(int)2");
    let sink = templated("sink", PadDirection::Sink, "audio/x-raw, rate=(int){ 8000, 16000 }");
    let events = Arc::new(Mutex::new(Vec::new()));
    let log = events.clone();
    sink.set_event_function(move |pad, event| {
        log.lock().unwrap().push(event.event_type());
        pad.event_default(event)
    });
    sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
    src.link(&sink).unwrap();
    assert!(sink.set_active(true) && src.set_active(true));

    assert!(src.push_event(Event::stream_start("negotiation")));
    assert_eq!(src.push(Buffer::new(8)), Ok(FlowSuccess::Ok));

    let caps = sink.current_caps().unwrap();
    let structure = caps.structure(0).unwrap();
    assert!(caps.is_fixed());
    assert_eq!(structure.get_int("rate"), Some(8000));
    assert_eq!(structure.get_int("channels"), Some(2));
    assert_eq!(*events.lock().unwrap(), [EventType::StreamStart, EventType::Caps]);
}

#[test]
fn test_disjoint_caps_refuse_link() {
    let src = templated("src", PadDirection::Src, "audio/x-raw, rate=(int)44100");
    let sink = templated("sink", PadDirection::Sink, "audio/x-raw, rate=(int)[ 8000, 16000 ]");
    assert_eq!(src.link(&sink), Err(PadLinkError::NoFormat));
    assert!(!src.is_linked());

    let wide = templated("wide", PadDirection::Sink, "audio/x-raw, rate=(int)[ 8000, 48000 ]");
    src.link(&wide).unwrap();
}

#[test]
fn test_sticky_events_follow_relink() {
    let (src, first) = linked_pair();
    first.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
    assert!(src.push_event(Event::stream_start("relink")));
    assert!(src.push_event(Event::segment(Default::default())));
    assert_eq!(src.push(Buffer::new(1)), Ok(FlowSuccess::Ok));

    assert!(src.unlink(&first));
    let second = Pad::new("second", PadDirection::Sink);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    second.set_event_function(move |pad, event| {
        log.lock().unwrap().push(event.event_type());
        pad.event_default(event)
    });
    second.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
    src.link(&second).unwrap();
    assert!(second.set_active(true));

    assert_eq!(src.push(Buffer::new(1)), Ok(FlowSuccess::Ok));
    assert_eq!(*seen.lock().unwrap(), [EventType::StreamStart, EventType::Segment]);
    assert!(second.sticky_event(EventType::Segment).is_some());
}

struct Bare;

impl ElementImpl for Bare {}

#[test]
fn test_rejected_caps_replay_posts_error() {
    let pipeline = Pipeline::new("p").unwrap();
    let element = Element::new("src", Bare).unwrap();
    pipeline.add(&element).unwrap();
    let src = Pad::new("src", PadDirection::Src);
    element.add_pad(src.clone()).unwrap();
    assert!(src.set_active(true));

    // Stored while unlinked, replayed on the first push after linking.
    assert!(src.push_event(Event::stream_start("replay")));
    assert!(src.push_event(Event::caps(Caps::from_str("video/x-raw").unwrap())));

    let sink = Pad::new("sink", PadDirection::Sink);
    sink.set_event_function(|pad, event| event.event_type() != EventType::Caps && pad.event_default(event));
    sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
    src.link(&sink).unwrap();
    assert!(sink.set_active(true));

    assert_eq!(src.push(Buffer::new(1)), Err(FlowError::NotNegotiated));
    assert!(src.sticky_event(EventType::Caps).is_none());

    let msg = pipeline
        .bus()
        .timed_pop_filtered(Some(Duration::ZERO), MessageType::ERROR)
        .expect("no ERROR posted");
    assert_eq!(msg.src_name(), Some("src"));
    assert_eq!(
        msg.error_message().unwrap().kind,
        ErrorKind::Stream(StreamError::NotNegotiated)
    );
}

#[test]
fn test_probe_can_drop_buffers() {
    let (src, sink) = linked_pair();
    let count = Arc::new(Mutex::new(0usize));
    let c = count.clone();
    sink.set_chain_function(move |_, _| {
        *c.lock().unwrap() += 1;
        Ok(FlowSuccess::Ok)
    });

    let probe = src.add_probe(PadProbeType::BUFFER, |_, _| PadProbeReturn::Drop);
    assert_eq!(src.push(Buffer::new(1)), Ok(FlowSuccess::Ok));
    assert_eq!(*count.lock().unwrap(), 0);

    assert!(src.remove_probe(probe));
    assert_eq!(src.push(Buffer::new(1)), Ok(FlowSuccess::Ok));
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn test_eos_refuses_data_until_flushed() {
    let (src, sink) = linked_pair();
    sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
    assert!(src.push_event(Event::stream_start("eos")));
    assert!(src.push_event(Event::eos()));
    assert!(sink.is_eos());
    assert_eq!(src.push(Buffer::new(1)), Err(FlowError::Eos));

    assert!(src.push_event(Event::flush_start()));
    assert!(src.push_event(Event::flush_stop(true)));
    assert!(!sink.is_eos());
    assert_eq!(src.push(Buffer::new(1)), Ok(FlowSuccess::Ok));
}

#[test]
fn test_flush_unblocks_pull_range() {
    let src = Pad::new("src", PadDirection::Src);
    let sink = Pad::new("sink", PadDirection::Sink);
    let queue: Arc<DataQueue<Buffer>> = Arc::new(DataQueue::new(DataQueueLimits::default()));
    let producer = queue.clone();
    src.set_getrange_function(move |_, _, _| producer.pop());
    src.set_event_function(|_, _| true);
    src.add_flush_target(&queue);
    src.link(&sink).unwrap();
    assert!(sink.activate_mode(PadMode::Pull, true));
    assert_eq!(src.mode(), PadMode::Pull);

    queue.push(Buffer::from_slice(b"ready")).unwrap();
    let ready = sink.pull_range(0, 5).unwrap();
    assert_eq!(ready.map_readable().as_slice(), b"ready");

    let puller = {
        let sink = sink.clone();
        thread::spawn(move || sink.pull_range(5, 5))
    };
    thread::sleep(Duration::from_millis(20));
    assert!(sink.push_event(Event::flush_start()));
    assert_eq!(puller.join().unwrap().unwrap_err(), FlowError::Flushing);

    // Between FLUSH-START and FLUSH-STOP pulls fail without blocking.
    assert!(sink.is_flushing());
    assert_eq!(sink.pull_range(5, 5).unwrap_err(), FlowError::Flushing);
    assert_eq!(queue.push(Buffer::from_slice(b"stale")), Err(FlowError::Flushing));

    assert!(sink.push_event(Event::flush_stop(true)));
    queue.push(Buffer::from_slice(b"again")).unwrap();
    let again = sink.pull_range(5, 5).unwrap();
    assert_eq!(again.map_readable().as_slice(), b"again");
}

#[test]
fn test_push_mode_refuses_pull() {
    let (_src, sink) = linked_pair();
    assert_eq!(sink.pull_range(0, 1).unwrap_err(), FlowError::NotSupported);
}

#[test]
fn test_bus_collects_messages_from_threads() {
    let bus = Bus::new();
    let posters: Vec<_> = (0..3)
        .map(|i| {
            let bus = bus.clone();
            thread::spawn(move || {
                let count = if i == 0 { 1 } else { 2 };
                for _ in 0..count {
                    assert!(bus.post(Message::eos(None)));
                }
            })
        })
        .collect();
    for poster in posters {
        poster.join().unwrap();
    }

    let mut seqnums = Vec::new();
    while let Some(msg) = bus.timed_pop(Some(Duration::ZERO)) {
        assert_eq!(msg.message_type(), MessageType::EOS);
        seqnums.push(msg.seqnum());
    }
    assert_eq!(seqnums.len(), 5);
    seqnums.sort_unstable();
    seqnums.dedup();
    assert_eq!(seqnums.len(), 5);
}

#[test]
fn test_caps_operations_agree() {
    let wide = Caps::builder("video/x-raw")
        .field("width", CapsValue::int_range(16, 4096))
        .build();
    let narrow = Caps::from_str("video/x-raw, width=(int)640").unwrap();
    assert!(narrow.is_subset(&wide));
    assert!(!wide.is_subset(&narrow));
    assert_eq!(wide.intersect(&narrow), narrow);
    assert!(wide.intersect(&Caps::new_empty()).is_empty());
    assert_eq!(Caps::new_any().intersect(&narrow), narrow);
    assert_eq!(wide.fixate().unwrap().structure(0).unwrap().get_int("width"), Some(16));
}
