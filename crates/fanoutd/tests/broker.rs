//! End-to-end broker tests over real TCP.
//!
//! Each test starts an embedded distributor on random ports and drives it
//! with the fanout-client producer and worker libraries.
//!
//! Run with: cargo test -p fanoutd --test broker -- --nocapture

use anyhow::Result;
use bytes::Bytes;
use fanout_client::{Producer, Worker};
use fanout_protocol::{BrokerMessage, QueuePolicy, Registration};
use fanoutd::{Config, Distributor, ShutdownHandle};
use std::time::Duration;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fanoutd=debug".parse().unwrap())
                .add_directive("fanout_client=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

struct TestBroker {
    producer_endpoint: String,
    worker_endpoint: String,
    shutdown: ShutdownHandle,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl TestBroker {
    /// Start a distributor on random ports with fast timings.
    async fn start() -> Result<Self> {
        let config = Config {
            producer_endpoint: "tcp://127.0.0.1:0".to_string(),
            worker_endpoint: "tcp://127.0.0.1:0".to_string(),
            heartbeat_interval: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(50),
        };
        let distributor = Distributor::bind(config).await?;
        let producer_endpoint = format!("tcp://{}", distributor.producer_addr());
        let worker_endpoint = format!("tcp://{}", distributor.worker_addr());
        let shutdown = distributor.shutdown_handle();
        let handle = tokio::spawn(distributor.run());
        Ok(Self {
            producer_endpoint,
            worker_endpoint,
            shutdown,
            handle,
        })
    }

    async fn connect_producer(&self) -> Result<Producer> {
        Ok(Producer::connect(&self.producer_endpoint).await?)
    }

    /// Connect and register a worker, then wait for the first heartbeat so
    /// the registration is known to be processed.
    async fn connect_worker(
        &self,
        stride: u64,
        offset: u64,
        policy: QueuePolicy,
        name: &str,
    ) -> Result<Worker> {
        let registration = Registration::new(stride, offset, policy, name)?;
        let mut worker = Worker::connect(&self.worker_endpoint, registration).await?;
        match timeout(RECV_TIMEOUT, worker.next()).await?? {
            BrokerMessage::Heartbeat => Ok(worker),
            other => anyhow::bail!("expected first heartbeat, got {other:?}"),
        }
    }

    async fn stop(self) -> Result<()> {
        self.shutdown.shutdown();
        self.handle.await??;
        Ok(())
    }
}

/// Next work item, skipping interleaved heartbeats.
async fn next_work_item(worker: &mut Worker) -> Result<(u64, Bytes)> {
    loop {
        match timeout(RECV_TIMEOUT, worker.next()).await?? {
            BrokerMessage::WorkItem { id, payload } => return Ok((id, payload)),
            BrokerMessage::Heartbeat => continue,
            BrokerMessage::Disconnect => anyhow::bail!("unexpected disconnect"),
        }
    }
}

/// Next non-heartbeat message.
async fn next_event(worker: &mut Worker) -> Result<BrokerMessage> {
    loop {
        match timeout(RECV_TIMEOUT, worker.next()).await?? {
            BrokerMessage::Heartbeat => continue,
            other => return Ok(other),
        }
    }
}

/// Assert that no work item reaches the worker within `window`.
async fn assert_no_work_item(worker: &mut Worker, window: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        match timeout(remaining, worker.next()).await {
            Err(_) => return Ok(()),
            Ok(Ok(BrokerMessage::Heartbeat)) => continue,
            Ok(Ok(other)) => anyhow::bail!("expected silence, got {other:?}"),
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

#[tokio::test]
async fn test_fanout_to_matching_workers() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut a = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "a")
        .await?;
    let mut b = broker
        .connect_worker(2, 0, QueuePolicy::ReceiveAll, "b")
        .await?;

    producer.send_item(7, &Bytes::new()).await?;
    producer.send_item(8, &Bytes::new()).await?;

    assert_eq!(next_work_item(&mut a).await?.0, 7);
    assert_eq!(next_work_item(&mut b).await?.0, 8);

    a.complete(7).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 7);

    assert_eq!(next_work_item(&mut a).await?.0, 8);
    a.complete(8).await?;
    b.complete(8).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 8);

    broker.stop().await
}

#[tokio::test]
async fn test_payload_reaches_worker() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "w")
        .await?;

    producer
        .send_item(1, &Bytes::from_static(b"timeslice data"))
        .await?;
    let (id, payload) = next_work_item(&mut worker).await?;
    assert_eq!(id, 1);
    assert_eq!(&payload[..], b"timeslice data");

    worker.complete(1).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 1);

    broker.stop().await
}

#[tokio::test]
async fn test_prebuffer_supersedes_older_waiting_item() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::PrebufferOne, "p")
        .await?;

    producer.send_item(1, &Bytes::new()).await?;
    assert_eq!(next_work_item(&mut worker).await?.0, 1);

    // Worker is busy with 1; 2 gets buffered, then superseded by 3.
    producer.send_item(2, &Bytes::new()).await?;
    producer.send_item(3, &Bytes::new()).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 2);

    worker.complete(1).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 1);

    assert_eq!(next_work_item(&mut worker).await?.0, 3);
    worker.complete(3).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 3);

    broker.stop().await
}

#[tokio::test]
async fn test_skip_policy_drops_items_while_busy() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::Skip, "s")
        .await?;

    producer.send_item(10, &Bytes::new()).await?;
    assert_eq!(next_work_item(&mut worker).await?.0, 10);

    producer.send_item(11, &Bytes::new()).await?;
    producer.send_item(12, &Bytes::new()).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 11);
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 12);

    worker.complete(10).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 10);

    // Nothing was buffered for the worker while it was busy.
    assert_no_work_item(&mut worker, Duration::from_millis(300)).await?;

    broker.stop().await
}

#[tokio::test]
async fn test_unmatched_item_completes_without_delivery() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut worker = broker
        .connect_worker(2, 1, QueuePolicy::ReceiveAll, "odd")
        .await?;

    producer.send_item(4, &Bytes::new()).await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 4);
    assert_no_work_item(&mut worker, Duration::from_millis(300)).await?;

    broker.stop().await
}

#[tokio::test]
async fn test_disconnect_mid_work_completes_exactly_once() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut a = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "a")
        .await?;
    let mut b = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "b")
        .await?;

    producer.send_item(99, &Bytes::new()).await?;
    assert_eq!(next_work_item(&mut a).await?.0, 99);
    assert_eq!(next_work_item(&mut b).await?.0, 99);

    a.complete(99).await?;
    // b drops its connection while still holding 99.
    drop(b);

    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 99);

    // Exactly once: no second completion follows.
    assert!(
        timeout(Duration::from_millis(300), producer.recv_completion())
            .await
            .is_err()
    );

    broker.stop().await
}

#[tokio::test]
async fn test_idle_worker_receives_periodic_heartbeats() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "idle")
        .await?;

    for _ in 0..3 {
        match timeout(RECV_TIMEOUT, worker.next()).await?? {
            BrokerMessage::Heartbeat => {}
            other => anyhow::bail!("expected heartbeat, got {other:?}"),
        }
    }

    broker.stop().await
}

#[tokio::test]
async fn test_bogus_completion_forces_disconnect() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "rogue")
        .await?;

    worker.complete(1234).await?;
    assert_eq!(next_event(&mut worker).await?, BrokerMessage::Disconnect);

    broker.stop().await
}

#[tokio::test]
async fn test_completions_survive_producer_reconnect() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut producer = broker.connect_producer().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "w")
        .await?;

    producer.send_item(5, &Bytes::new()).await?;
    assert_eq!(next_work_item(&mut worker).await?.0, 5);

    // Producer goes away before the completion arrives.
    drop(producer);
    tokio::time::sleep(Duration::from_millis(300)).await;

    worker.complete(5).await?;

    // The completion is retained and flushed to the next producer.
    let mut producer = broker.connect_producer().await?;
    assert_eq!(timeout(RECV_TIMEOUT, producer.recv_completion()).await??, 5);

    broker.stop().await
}

#[tokio::test]
async fn test_shutdown_disconnects_workers() -> Result<()> {
    init_tracing();
    let broker = TestBroker::start().await?;
    let mut worker = broker
        .connect_worker(1, 0, QueuePolicy::ReceiveAll, "w")
        .await?;

    broker.stop().await?;
    assert_eq!(next_event(&mut worker).await?, BrokerMessage::Disconnect);
    Ok(())
}
