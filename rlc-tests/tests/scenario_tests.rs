//! End-to-end delivery scenarios over the simulation harness

use bytes::Bytes;
use rlc_protocol::{AmConfig, ConnectionKey};
use rlc_sim::{Harness, Link};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> AmConfig {
    AmConfig {
        fragment_unit: 10,
        tx_window_size: 16,
        rx_window_size: 16,
        max_retx: 3,
        ..AmConfig::default()
    }
}

#[test]
fn test_single_sdu_lossless() {
    init_tracing();
    let key = ConnectionKey::new(1, 1);
    let mut harness = Harness::new(config());
    let payload = Bytes::from((0u8..255).cycle().take(95).collect::<Vec<_>>());

    harness.submit_a(key, payload.clone()).unwrap();
    harness.run_to_quiescence(10_000).unwrap();

    assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    let stats = harness.a.stats(key).unwrap();
    assert_eq!(stats.tx.fragments_sent, 10);
    assert_eq!(stats.tx.retransmissions, 0);
    // the MRW handshake freed the whole window
    assert_eq!(harness.b.stats(key).unwrap().rx.sdus_delivered, 1);
}

#[test]
fn test_lost_fragment_is_retransmitted() {
    init_tracing();
    let key = ConnectionKey::new(1, 1);
    // lose the third data fragment on its first crossing
    let mut harness = Harness::with_links(config(), Link::with_drops(&[2]), Link::new());
    let payload = Bytes::from(vec![9u8; 55]);

    harness.submit_a(key, payload.clone()).unwrap();
    harness.run_to_quiescence(10_000).unwrap();

    assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    let stats = harness.a.stats(key).unwrap();
    assert!(stats.tx.retransmissions >= 1);
    assert_eq!(harness.links_lost().0, 1);
}

#[test]
fn test_lost_status_report_is_recovered_by_periodic_timer() {
    init_tracing();
    let key = ConnectionKey::new(1, 1);
    // lose the receiver's first status report
    let mut harness = Harness::with_links(config(), Link::new(), Link::with_drops(&[0]));
    let payload = Bytes::from(vec![3u8; 40]);

    harness.submit_a(key, payload.clone()).unwrap();
    harness.run_to_quiescence(10_000).unwrap();

    assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    assert!(harness.b.stats(key).unwrap().rx.status_reports_sent >= 2);
}

#[test]
fn test_lost_mrw_is_retransmitted() {
    init_tracing();
    let key = ConnectionKey::new(1, 1);
    let cfg = AmConfig {
        // one fragment per SDU keeps the transmission indexes predictable
        fragment_unit: 100,
        ..config()
    };
    // a -> b transmissions: 0 = data fragment, 1 = first MRW
    let mut harness = Harness::with_links(cfg, Link::with_drops(&[1]), Link::new());
    let payload = Bytes::from(vec![5u8; 60]);

    harness.submit_a(key, payload.clone()).unwrap();
    harness.run_to_quiescence(10_000).unwrap();

    assert_eq!(harness.delivered_b(), vec![(key, payload)]);
    let stats = harness.a.stats(key).unwrap();
    assert!(stats.tx.mrw_commands_sent >= 2);
    assert_eq!(harness.a.tx_window_first(key), harness.b.rx_window_first(key));
}

#[test]
fn test_hopeless_sdu_is_dropped_and_traffic_resumes() {
    init_tracing();
    let key = ConnectionKey::new(1, 1);
    let cfg = AmConfig {
        fragment_unit: 100,
        max_retx: 1,
        ..config()
    };
    // the single fragment of the first SDU is lost on both its initial
    // transmission (index 0) and its only retry (index 1)
    let mut harness = Harness::with_links(cfg, Link::with_drops(&[0, 1]), Link::new());
    let doomed = Bytes::from(vec![1u8; 50]);
    let follow_up = Bytes::from(vec![2u8; 50]);

    harness.submit_a(key, doomed).unwrap();
    harness.run_to_quiescence(10_000).unwrap();
    assert!(harness.delivered_b().is_empty());
    let stats = harness.a.stats(key).unwrap();
    assert_eq!(stats.tx.fragments_discarded, 1);

    // both windows moved past the discarded SDU, later traffic flows
    harness.submit_a(key, follow_up.clone()).unwrap();
    harness.run_to_quiescence(10_000).unwrap();
    assert_eq!(harness.delivered_b(), vec![(key, follow_up)]);
}

#[test]
fn test_many_sdus_with_scattered_losses() {
    init_tracing();
    let key = ConnectionKey::new(1, 1);
    let cfg = AmConfig {
        max_retx: 10,
        ..config()
    };
    let mut harness = Harness::with_links(cfg, Link::with_drops(&[1, 5, 11]), Link::with_drops(&[2]));

    let payloads: Vec<Bytes> = (0..6)
        .map(|i| Bytes::from(vec![i as u8; 25 + i * 7]))
        .collect();
    for payload in &payloads {
        harness.submit_a(key, payload.clone()).unwrap();
    }
    harness.run_to_quiescence(50_000).unwrap();

    // SDUs complete in whatever order retransmissions allow; compare as sets
    let mut delivered: Vec<Bytes> = harness.delivered_b().into_iter().map(|(_, s)| s).collect();
    delivered.sort_by_key(|s| s.len());
    let mut expected = payloads.clone();
    expected.sort_by_key(|s| s.len());
    assert_eq!(delivered, expected);
}
