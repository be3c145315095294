//! Property-based tests for the streaming producer/consumer pair.
//!
//! Verifies:
//! - Order preservation: N records with batch size B come back as the same N
//!   records in the same order, however producer and consumer interleave
//! - Throttling: whenever the producer holds an open batch, at most
//!   `throttle_limit` batches are outstanding
//! - Cleanup: once both sides are done the spool directory is empty
//! - Outstanding arithmetic: an unseen consumer counts as batch -1

use proptest::prelude::*;

use spoolbridge_core::batch::outstanding_batches;
use spoolbridge_core::config::StreamConfig;
use spoolbridge_core::control::{ControlReceiver, ControlSender};
use spoolbridge_core::progress::{ProgressPublisher, ShutdownSignal};
use spoolbridge_core::spool::Spool;
use spoolbridge_core::{Record, StreamConsumer, StreamProducer};
use tokio::io::BufReader;

// ────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────

fn arb_records() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..120)
}

fn arb_stream_config() -> impl Strategy<Value = StreamConfig> {
    (1usize..=8, 1u64..=4).prop_map(|(batch_size, throttle_limit)| StreamConfig {
        batch_size,
        throttle_limit,
    })
}

// ────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────

struct RunResult {
    received: Vec<Record>,
    max_outstanding: u64,
    leftover_files: usize,
}

fn run_stream(config: &StreamConfig, payloads: Vec<Vec<u8>>, pipe_capacity: usize) -> RunResult {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path(), "in");
        let (host, worker) = tokio::io::duplex(pipe_capacity);
        let progress = ProgressPublisher::new();

        let mut producer = StreamProducer::new(
            spool,
            config,
            ControlSender::new(host),
            progress.subscribe(),
            ShutdownSignal::never(),
        );
        let mut consumer = StreamConsumer::new(
            ControlReceiver::new(BufReader::new(worker)),
            progress.clone(),
            ShutdownSignal::never(),
        );

        let limit = config.throttle_limit;
        let observer = progress.clone();
        let produce = tokio::spawn(async move {
            let mut max_outstanding = 0;
            for payload in payloads {
                producer.enqueue(&Record::new(payload)).await.unwrap();
                if producer.current_path().is_some() {
                    let outstanding =
                        outstanding_batches(producer.next_batch_id(), observer.last_seen());
                    assert!(outstanding <= limit, "{outstanding} > {limit}");
                    max_outstanding = max_outstanding.max(outstanding);
                }
                tokio::task::yield_now().await;
            }
            producer.flush().await.unwrap();
            producer.close();
            max_outstanding
        });

        let consume = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(record) = consumer.next().await.unwrap() {
                received.push(record);
            }
            consumer.close();
            received
        });

        let max_outstanding = produce.await.unwrap();
        let received = consume.await.unwrap();
        let leftover_files = std::fs::read_dir(dir.path()).unwrap().count();
        RunResult {
            received,
            max_outstanding,
            leftover_files,
        }
    })
}

// ────────────────────────────────────────────────────────────────────
// Properties
// ────────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn records_come_back_in_order(
        config in arb_stream_config(),
        payloads in arb_records(),
        pipe_capacity in prop_oneof![Just(16usize), Just(4096usize)],
    ) {
        let expected: Vec<Record> = payloads.iter().cloned().map(Record::new).collect();
        let result = run_stream(&config, payloads, pipe_capacity);
        prop_assert_eq!(result.received, expected);
        prop_assert!(result.max_outstanding <= config.throttle_limit);
        prop_assert_eq!(result.leftover_files, 0);
    }

    #[test]
    fn unseen_consumer_counts_as_minus_one(next in 0u64..1_000_000) {
        prop_assert_eq!(outstanding_batches(next, None), next + 1);
        prop_assert_eq!(outstanding_batches(next, Some(next)), 0);
    }

    #[test]
    fn consumer_progress_never_increases_outstanding(
        next in 0u64..10_000,
        seen in 0u64..10_000,
        step in 0u64..100,
    ) {
        let before = outstanding_batches(next, Some(seen));
        let after = outstanding_batches(next, Some(seen + step));
        prop_assert!(after <= before);
        prop_assert!(outstanding_batches(next, Some(seen)) <= outstanding_batches(next, None));
    }
}
