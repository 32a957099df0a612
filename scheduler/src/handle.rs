//! `JobHandle`: the transient state bound to a Scheduled job (§3). Created
//! by the Scheduler on `add`, destroyed once the Job loop's drain finishes.

use crate::job::{DepResult, TaskTime};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct JobHandle {
    /// Cancels the Job loop. Does NOT cancel live Executions — the loop
    /// must drain them naturally (§5 cancellation semantics).
    pub cancel_loop: CancellationToken,

    /// A bounded FIFO of per-Execution cancellers enforcing
    /// `max_concurrent`: pushing past capacity cancels and evicts the
    /// oldest entry.
    cancel_executions: Mutex<VecDeque<CancellationToken>>,
    ring_capacity: usize,

    /// Minute ticks are delivered to the Job loop over this channel; the
    /// loop owns the receiving half.
    pub clock_in: mpsc::Sender<chrono::DateTime<chrono::Utc>>,

    /// `task_time -> result sink`, the dependency rendezvous ledger (§4.4).
    pub dep_waiters: Mutex<HashMap<TaskTime, mpsc::Sender<DepResult>>>,

    /// The live Execution set. A `JoinSet` both tracks and lets the Job
    /// loop await-drain every outstanding Execution task, in the style of
    /// the teacher's `runner` module's join-handle maps.
    pub executions: Mutex<JoinSet<()>>,
}

/// Depth of the minute-tick channel each Job loop reads from. A handful of
/// slots is enough to absorb a brief stall without blocking the fan-out
/// task for longer than its own soft timeout.
const CLOCK_IN_CAPACITY: usize = 4;

impl JobHandle {
    /// Returns the handle plus the receiving half of `clock_in`, which the
    /// caller must hand to the spawned Job loop.
    pub fn new(max_concurrent: usize) -> (Self, mpsc::Receiver<chrono::DateTime<chrono::Utc>>) {
        let (clock_tx, clock_rx) = mpsc::channel(CLOCK_IN_CAPACITY);
        let handle = Self {
            cancel_loop: CancellationToken::new(),
            cancel_executions: Mutex::new(VecDeque::with_capacity(max_concurrent)),
            ring_capacity: max_concurrent.max(1),
            clock_in: clock_tx,
            dep_waiters: Mutex::new(HashMap::new()),
            executions: Mutex::new(JoinSet::new()),
        };
        (handle, clock_rx)
    }

    /// Registers a new Execution's canceller, evicting and cancelling the
    /// oldest one if the ring is already at `max_concurrent`. Returns the
    /// token the caller should hand to the new Execution.
    pub async fn admit_execution(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut ring = self.cancel_executions.lock().await;
        if ring.len() >= self.ring_capacity {
            if let Some(evicted) = ring.pop_front() {
                evicted.cancel();
            }
        }
        ring.push_back(token.clone());
        token
    }

    /// Cancels every currently-live Execution without touching `cancel_loop`.
    pub async fn cancel_all_executions(&self) {
        let ring = self.cancel_executions.lock().await;
        for token in ring.iter() {
            token.cancel();
        }
    }
}
