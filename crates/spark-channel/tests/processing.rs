mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use spark_channel::{
    ChannelBinding, DecodeError, MessageHandlers, MessageLength, ProcessOutcome, ProtocolClass,
    TransportKind, Trust,
};
use support::{
    Harness, MemoryEndpoint, PEER, ScriptedAlt, UPGRADE_REQUEST, UPGRADE_RESPONSE, move_message,
    recording_handlers,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn decode_fault_condemns_and_releases_the_whole_batch() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(1, TransportKind::Stream, Trust::External);
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&move_message(1, 1)));
    channel.add_receive_window(harness.packet(&[0x99, 0x00, 0, 0]));
    channel.add_receive_window(harness.packet(&move_message(3, 3)));

    let ProcessOutcome::Processed(report) = channel.process_packets(&mut handlers) else {
        panic!("活跃通道应正常处理");
    };

    assert_eq!(report.decoded, 1);
    assert_eq!(report.released, 3);
    assert_eq!(
        report.fault,
        Some(DecodeError::UnknownMessage { message_id: 0x99 })
    );
    assert_eq!(*seen.lock(), vec![(1, vec![1, 1])]);
    assert!(channel.is_condemned());
    assert_eq!(channel.buffered_packets(), 0);

    let packets = harness.packets.stats();
    assert_eq!(packets.acquired, 3);
    assert_eq!(packets.reclaimed, 3);
    assert_eq!(packets.active, 0);

    let decoder = channel.decoder().expect("握手已安装解码器");
    assert_eq!(decoder.reader().current_message_id(), 0, "解码游标已清零");
    assert!(logs_contain("packet invalid"));
    assert!(logs_contain("message_name=unknown"));
}

#[test]
fn condemned_channel_performs_no_decode_work() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(2, TransportKind::Stream, Trust::External);
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&move_message(5, 5)));
    channel.condemn();

    assert!(matches!(
        channel.process_packets(&mut handlers),
        ProcessOutcome::Condemned
    ));
    assert!(seen.lock().is_empty());
    assert!(channel.decoder().is_none(), "失效通道不握手");
    assert_eq!(channel.buffered_packets(), 1);
    assert!(channel.is_condemned());
    assert!(!channel.is_destroyed(), "判定失效不会自行销毁");
}

#[test]
fn destroyed_channel_releases_buffered_packets_immediately() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(3, TransportKind::Stream, Trust::External);
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&move_message(1, 2)));
    channel.add_receive_window(harness.packet(&move_message(3, 4)));
    channel.destroy();

    assert!(matches!(
        channel.process_packets(&mut handlers),
        ProcessOutcome::Destroyed { released: 2 }
    ));
    assert!(seen.lock().is_empty());
    assert_eq!(harness.packets.stats().active, 0);
}

#[test]
fn packets_added_after_a_pass_belong_to_the_next_pass() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(4, TransportKind::Stream, Trust::Internal);
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&move_message(1, 0)));
    channel.process_packets(&mut handlers);
    channel.add_receive_window(harness.packet(&move_message(2, 0)));
    assert_eq!(seen.lock().len(), 1);

    channel.process_packets(&mut handlers);
    assert_eq!(*seen.lock(), vec![(1, vec![1, 0]), (1, vec![2, 0])]);
}

#[test]
fn messages_spanning_packets_are_reassembled_in_arrival_order() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(5, TransportKind::Stream, Trust::Internal);
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&[2, 0, 5, 0, b'h', b'e']));
    channel.add_receive_window(harness.packet(&[b'l', b'l', b'o', 1, 0, 9]));
    channel.process_packets(&mut handlers);
    assert_eq!(*seen.lock(), vec![(2, b"hello".to_vec())]);

    channel.add_receive_window(harness.packet(&[9]));
    channel.process_packets(&mut handlers);
    assert_eq!(seen.lock().last(), Some(&(1, vec![9, 9])));
}

#[test]
fn empty_window_defers_handshake() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(6, TransportKind::Stream, Trust::External);
    let mut handlers = MessageHandlers::new();

    let mut channel = handle.lock();
    let outcome = channel.process_packets(&mut handlers);
    assert!(matches!(outcome, ProcessOutcome::Processed(report) if report.released == 0));
    assert!(channel.decoder().is_none());
    assert_eq!(channel.protocol(), ProtocolClass::Undetermined);
}

#[test]
fn alt_handshake_installs_alt_codec_and_drops_consumed_request() {
    let harness = Harness::new();
    let alt = ScriptedAlt::new(true);
    let endpoint = MemoryEndpoint::new(PEER);
    let handle = harness.open_with(
        ChannelBinding::new(7, TransportKind::Stream, Trust::External, endpoint.clone())
            .with_alt_protocol(alt.clone()),
    );
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(UPGRADE_REQUEST));
    channel.add_receive_window(harness.packet(b"frame"));
    let ProcessOutcome::Processed(report) = channel.process_packets(&mut handlers) else {
        panic!("活跃通道应正常处理");
    };

    assert_eq!(alt.handshakes.load(Ordering::SeqCst), 1);
    assert_eq!(channel.protocol(), ProtocolClass::AltFramed);
    assert!(channel.decoder().is_some_and(|decoder| decoder.is_alt()));
    assert!(channel.has_filter());
    assert_eq!(report.released, 1, "握手读空的首包在解码前移出窗口");
    assert_eq!(*seen.lock(), vec![(1, b"frame".to_vec())]);
    assert_eq!(endpoint.written(), UPGRADE_RESPONSE);
    assert_eq!(harness.packets.stats().active, 0);

    channel.add_receive_window(harness.packet(UPGRADE_REQUEST));
    channel.process_packets(&mut handlers);
    assert_eq!(alt.handshakes.load(Ordering::SeqCst), 1, "每个连接只握手一次");
}

#[test]
fn handshake_leftover_is_decoded_by_alt_reader_in_the_same_pass() {
    let harness = Harness::new();
    let alt = ScriptedAlt::new(true);
    let endpoint = MemoryEndpoint::new(PEER);
    let handle = harness.open_with(
        ChannelBinding::new(13, TransportKind::Stream, Trust::External, endpoint.clone())
            .with_alt_protocol(alt.clone()),
    );
    let (mut handlers, seen) = recording_handlers();

    let mut first = UPGRADE_REQUEST.to_vec();
    first.extend_from_slice(b"early");
    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&first));
    let ProcessOutcome::Processed(report) = channel.process_packets(&mut handlers) else {
        panic!("活跃通道应正常处理");
    };

    assert_eq!(alt.handshakes.load(Ordering::SeqCst), 1);
    assert!(channel.decoder().is_some_and(|decoder| decoder.is_alt()));
    assert_eq!(*seen.lock(), vec![(1, b"early".to_vec())], "握手余下的帧字节本轮解码");
    assert_eq!(report.decoded, 1);
    assert_eq!(report.released, 1, "未读空的首包留在窗口，解码后归还");
    assert!(report.fault.is_none());
    assert_eq!(endpoint.written(), UPGRADE_RESPONSE);

    let packets = harness.packets.stats();
    assert_eq!(packets.acquired, 1);
    assert_eq!(packets.reclaimed, 1);
    assert_eq!(packets.active, 0);
}

#[test]
fn failed_alt_handshake_falls_back_to_raw_framing() {
    let harness = Harness::new();
    let alt = ScriptedAlt::new(false);
    let endpoint = MemoryEndpoint::new(PEER);
    let handle = harness.open_with(
        ChannelBinding::new(8, TransportKind::Stream, Trust::External, endpoint.clone())
            .with_alt_protocol(alt),
    );
    let mut handlers = MessageHandlers::new();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(UPGRADE_REQUEST));
    let ProcessOutcome::Processed(report) = channel.process_packets(&mut handlers) else {
        panic!("活跃通道应正常处理");
    };

    assert_eq!(channel.protocol(), ProtocolClass::AltFramed);
    assert!(channel.decoder().is_some_and(|decoder| !decoder.is_alt()));
    assert!(!channel.has_filter());
    assert!(report.fault.is_some(), "HTTP 文本不是合法的原始分帧");
    assert!(channel.is_condemned());
    assert!(endpoint.written().is_empty());
}

#[test]
fn raw_traffic_ignores_alt_protocol() {
    let harness = Harness::new();
    let alt = ScriptedAlt::new(true);
    let endpoint = MemoryEndpoint::new(PEER);
    let handle = harness.open_with(
        ChannelBinding::new(9, TransportKind::Stream, Trust::External, endpoint.clone())
            .with_alt_protocol(alt.clone()),
    );
    let (mut handlers, seen) = recording_handlers();

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&move_message(4, 2)));
    channel.process_packets(&mut handlers);

    assert_eq!(alt.handshakes.load(Ordering::SeqCst), 0);
    assert_eq!(channel.protocol(), ProtocolClass::Raw);
    assert_eq!(*seen.lock(), vec![(1, vec![4, 2])]);
    assert!(endpoint.written().is_empty());
}

#[test]
fn dedicated_handler_table_overrides_caller_table() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(10, TransportKind::Stream, Trust::Internal);
    let (mut caller, caller_seen) = recording_handlers();

    let hits = Arc::new(AtomicUsize::new(0));
    let mut own = MessageHandlers::new();
    let counter = Arc::clone(&hits);
    own.register(1, "own_move", MessageLength::Fixed(2), move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut channel = handle.lock();
    assert!(channel.set_message_handlers(Some(own)).is_none());
    channel.add_receive_window(harness.packet(&move_message(0, 1)));
    channel.process_packets(&mut caller);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(caller_seen.lock().is_empty());
}

#[test]
fn replies_from_handlers_are_flushed_at_end_of_pass() {
    let harness = Harness::new();
    let (handle, endpoint) = harness.open(11, TransportKind::Stream, Trust::External);

    let replies = harness.bundles.clone();
    let mut handlers = MessageHandlers::new();
    handlers.register(1, "ping", MessageLength::Fixed(2), move |ctx, body| {
        let mut bundle = replies.acquire();
        bundle
            .write_message(2, MessageLength::Variable, body)
            .expect("回包写入");
        ctx.reply(bundle);
    });

    let mut channel = handle.lock();
    channel.add_receive_window(harness.packet(&move_message(7, 8)));
    let ProcessOutcome::Processed(report) = channel.process_packets(&mut handlers) else {
        panic!("活跃通道应正常处理");
    };

    assert_eq!(report.sent.bundles_sent, 1);
    assert_eq!(endpoint.written(), vec![2, 0, 2, 0, 7, 8]);
    assert_eq!(channel.stats().bytes_sent, 6);
    assert_eq!(harness.bundles.stats().active, 0);
}

#[test]
fn processing_resets_per_tick_byte_counter() {
    let harness = Harness::new();
    let (handle, _endpoint) = harness.open(12, TransportKind::Stream, Trust::External);
    let mut handlers = MessageHandlers::new();

    let mut channel = handle.lock();
    channel.on_packet_received(100);
    channel.on_packet_received(50);
    assert_eq!(channel.stats().last_tick_bytes_received, 150);

    channel.process_packets(&mut handlers);
    let stats = channel.stats();
    assert_eq!(stats.last_tick_bytes_received, 0);
    assert_eq!(stats.bytes_received, 150);
    assert_eq!(stats.packets_received, 2);
    assert_eq!(harness.interface.stats.snapshot().bytes_received, 150);
}
