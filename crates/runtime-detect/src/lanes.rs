use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LaneError;
use crate::event::RuntimeEvent;

/// Consumes events handed out by [`EventLanes`]. Called from one task per
/// lane, so all events of a container arrive in submission order.
pub trait EventProcessor: Send + Sync + 'static {
    fn process(&self, event: RuntimeEvent);
}

/// Partitions events across a fixed number of ordered lanes by container id.
///
/// Each lane is a bounded channel drained by its own task. Containers never
/// share ordering constraints with containers on other lanes.
#[derive(Clone)]
pub struct EventLanes {
    senders: Vec<mpsc::Sender<RuntimeEvent>>,
}

/// Worker tasks behind a set of lanes. They finish once every
/// [`EventLanes`] handle has been dropped and the queues are drained.
pub struct LaneWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl EventLanes {
    /// Spawn `lanes` workers on the current tokio runtime.
    pub fn start(lanes: usize, capacity: usize, processor: Arc<dyn EventProcessor>) -> (Self, LaneWorkers) {
        let lanes = lanes.max(1);
        let mut senders = Vec::with_capacity(lanes);
        let mut handles = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let (tx, mut rx) = mpsc::channel::<RuntimeEvent>(capacity.max(1));
            let processor = Arc::clone(&processor);
            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    processor.process(event);
                }
                debug!(lane, "event lane drained");
            }));
            senders.push(tx);
        }
        (Self { senders }, LaneWorkers { handles })
    }

    pub fn lane_count(&self) -> usize {
        self.senders.len()
    }

    pub fn lane_for(&self, container_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        container_id.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Enqueue, waiting for room if the lane is full.
    pub async fn submit(&self, event: RuntimeEvent) -> Result<(), LaneError> {
        let lane = self.lane_for(&event.container_id);
        self.senders[lane]
            .send(event)
            .await
            .map_err(|_| LaneError::Closed { lane })
    }

    /// Enqueue without waiting. A full lane drops the event.
    pub fn try_submit(&self, event: RuntimeEvent) -> Result<(), LaneError> {
        let lane = self.lane_for(&event.container_id);
        match self.senders[lane].try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(
                    lane,
                    container_id = %event.container_id,
                    sequence = event.sequence,
                    "event lane full, event dropped"
                );
                Err(LaneError::Full { lane })
            }
            Err(TrySendError::Closed(_)) => Err(LaneError::Closed { lane }),
        }
    }
}

impl LaneWorkers {
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "event lane task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<HashMap<String, Vec<u64>>>,
    }

    impl EventProcessor for Recorder {
        fn process(&self, event: RuntimeEvent) {
            self.seen
                .lock()
                .entry(event.container_id)
                .or_default()
                .push(event.sequence);
        }
    }

    fn event(container: &str, sequence: u64) -> RuntimeEvent {
        RuntimeEvent {
            timestamp: Utc::now(),
            container_id: container.into(),
            category: "exec".into(),
            fields: serde_json::json!({}),
            sequence,
        }
    }

    #[tokio::test]
    async fn per_container_order_is_preserved() {
        let recorder = Arc::new(Recorder::default());
        let (lanes, workers) = EventLanes::start(4, 8, recorder.clone());

        let producers: Vec<_> = (0..6)
            .map(|c| {
                let lanes = lanes.clone();
                tokio::spawn(async move {
                    let container = format!("container-{c}");
                    for seq in 0..100 {
                        lanes.submit(event(&container, seq)).await.unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.await.unwrap();
        }
        drop(lanes);
        workers.join().await;

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 6);
        for (container, sequences) in seen.iter() {
            let expected: Vec<u64> = (0..100).collect();
            assert_eq!(sequences, &expected, "out of order for {container}");
        }
    }

    #[tokio::test]
    async fn container_always_maps_to_same_lane() {
        let (lanes, _workers) = EventLanes::start(8, 1, Arc::new(Recorder::default()));
        let lane = lanes.lane_for("abc");
        for _ in 0..10 {
            assert_eq!(lanes.lane_for("abc"), lane);
        }
        assert!(lane < lanes.lane_count());
    }

    struct Blocked(tokio::sync::Semaphore);

    impl EventProcessor for Blocked {
        fn process(&self, _event: RuntimeEvent) {
            // Never returns while the semaphore has no permits.
            while self.0.try_acquire().is_err() {
                std::thread::yield_now();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn try_submit_drops_when_lane_full() {
        let gate = Arc::new(Blocked(tokio::sync::Semaphore::new(0)));
        let (lanes, workers) = EventLanes::start(1, 1, gate.clone());

        // The worker takes the first event and blocks; the second fills the
        // queue; the third must be dropped.
        lanes.try_submit(event("c1", 1)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        lanes.try_submit(event("c1", 2)).unwrap();
        assert_eq!(lanes.try_submit(event("c1", 3)), Err(LaneError::Full { lane: 0 }));

        gate.0.add_permits(2);
        drop(lanes);
        workers.join().await;
    }
}
