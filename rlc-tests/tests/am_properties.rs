//! Property-based tests for the AM engine
//!
//! Random payloads, fragment sizes and scripted losses; the engine must keep
//! its window bound, reassemble byte-exact SDUs and always reach quiescence.

use bytes::Bytes;
use proptest::prelude::*;
use rlc_protocol::pdu::{AmPdu, ControlPdu};
use rlc_protocol::tx::TxBuffer;
use rlc_protocol::{AmConfig, ConnectionKey, SeqNumber};
use rlc_sim::{Harness, Link};
use std::time::Instant;

fn ack_strategy() -> impl Strategy<Value = ControlPdu> {
    (
        proptest::option::of(0u32..10_000),
        0u32..10_000,
        proptest::collection::vec(any::<bool>(), 0..64),
    )
        .prop_map(|(cumulative, first, bitmap)| ControlPdu::Ack {
            cumulative: cumulative.map(SeqNumber::new),
            first_sn: SeqNumber::new(first),
            bitmap,
        })
}

proptest! {
    #[test]
    fn prop_ack_wire_roundtrip(ack in ack_strategy()) {
        let pdu = AmPdu::Control(ack);
        let bytes = pdu.to_bytes();
        prop_assert_eq!(AmPdu::from_bytes(&bytes).unwrap(), pdu);
    }

    #[test]
    fn prop_lossless_delivery_is_byte_exact(
        payload in proptest::collection::vec(any::<u8>(), 0..400),
        fragment_unit in 1usize..=32,
    ) {
        let key = ConnectionKey::new(1, 1);
        let config = AmConfig {
            fragment_unit,
            tx_window_size: 64,
            rx_window_size: 64,
            ..AmConfig::default()
        };
        let payload = Bytes::from(payload);
        let mut harness = Harness::new(config);
        harness.submit_a(key, payload.clone()).unwrap();
        harness.run_to_quiescence(50_000).unwrap();
        prop_assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    }

    #[test]
    fn prop_scattered_losses_never_prevent_delivery(
        payload in proptest::collection::vec(any::<u8>(), 1..200),
        forward_drops in proptest::collection::btree_set(0u64..30, 0..=4),
        reverse_drops in proptest::collection::btree_set(0u64..30, 0..=4),
    ) {
        let key = ConnectionKey::new(1, 1);
        let config = AmConfig {
            fragment_unit: 10,
            tx_window_size: 32,
            rx_window_size: 32,
            // far more retries than any scripted loss pattern can exhaust
            max_retx: 10,
            ..AmConfig::default()
        };
        let payload = Bytes::from(payload);
        let forward: Vec<u64> = forward_drops.into_iter().collect();
        let reverse: Vec<u64> = reverse_drops.into_iter().collect();
        let mut harness = Harness::with_links(
            config,
            Link::with_drops(&forward),
            Link::with_drops(&reverse),
        );
        harness.submit_a(key, payload.clone()).unwrap();
        harness.run_to_quiescence(100_000).unwrap();
        prop_assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    }

    #[test]
    fn prop_window_first_never_rewinds(
        payload in proptest::collection::vec(any::<u8>(), 1..200),
        forward_drops in proptest::collection::btree_set(0u64..30, 0..=3),
        reverse_drops in proptest::collection::btree_set(0u64..30, 0..=3),
    ) {
        let key = ConnectionKey::new(1, 1);
        let config = AmConfig {
            fragment_unit: 10,
            tx_window_size: 32,
            rx_window_size: 32,
            max_retx: 10,
            ..AmConfig::default()
        };
        let payload = Bytes::from(payload);
        let forward: Vec<u64> = forward_drops.into_iter().collect();
        let reverse: Vec<u64> = reverse_drops.into_iter().collect();
        let mut harness = Harness::with_links(
            config,
            Link::with_drops(&forward),
            Link::with_drops(&reverse),
        );
        harness.submit_a(key, payload.clone()).unwrap();

        let mut tx_first = SeqNumber::ZERO;
        let mut rx_first = SeqNumber::ZERO;
        for _ in 0..100_000 {
            if !harness.step().unwrap() {
                break;
            }
            if let Some(first) = harness.a.tx_window_first(key) {
                prop_assert!(first >= tx_first);
                tx_first = first;
            }
            if let Some(first) = harness.b.rx_window_first(key) {
                prop_assert!(first >= rx_first);
                rx_first = first;
            }
        }
        prop_assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    }

    #[test]
    fn prop_in_flight_never_exceeds_window(
        sdu_lens in proptest::collection::vec(1usize..120, 1..8),
        window in 1usize..=16,
    ) {
        let now = Instant::now();
        let config = AmConfig {
            fragment_unit: 10,
            tx_window_size: window,
            ..AmConfig::default()
        };
        let mut tx = TxBuffer::new(config);
        for len in sdu_lens {
            tx.enqueue(Bytes::from(vec![0u8; len]), now).unwrap();
            prop_assert!(tx.in_flight() <= window);
        }
        while tx.poll_transmit().is_some() {}
        prop_assert!(tx.in_flight() <= window);
    }

    #[test]
    fn prop_repeated_acks_are_idempotent(
        acked in 0u32..8,
    ) {
        let now = Instant::now();
        let config = AmConfig {
            fragment_unit: 10,
            tx_window_size: 8,
            ..AmConfig::default()
        };
        let mut tx = TxBuffer::new(config);
        tx.enqueue(Bytes::from(vec![0u8; 80]), now).unwrap();
        while tx.poll_transmit().is_some() {}

        let ack = ControlPdu::Ack {
            cumulative: Some(SeqNumber::new(acked)),
            first_sn: SeqNumber::new(acked + 1),
            bitmap: vec![],
        };
        tx.handle_control(ack.clone(), now).unwrap();
        let in_flight = tx.in_flight();
        let first = tx.first_seq();
        tx.handle_control(ack, now).unwrap();
        prop_assert_eq!(tx.in_flight(), in_flight);
        prop_assert_eq!(tx.first_seq(), first);
    }
}
