//! C9: the timer / scheduler. Replaces the original's `times[0..8]` array
//! and `got_interrupt[]` flags with a min-heap of `(deadline, event-kind)`
//! entries and generation-based tombstoning for cancellation (REDESIGN
//! FLAG, spec.md §9). [`TimerThread`] is the OS thread that turns the next
//! heap deadline into a wakeup of the main event loop's `mio::Poll`,
//! standing in for the original's timer-signal-driven self-pipe (spec.md
//! §5) — see [`crate::mio_source`] for the pipe-over-`Waker` itself.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mio::Waker;

/// "10x TIME_BASE rounded up to seconds" (`SAFETY_INTERVAL = 1000` ms):
/// forces a tick even if every other deadline is far off.
pub const SAFETY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  BeaconEmit,
  NeighborFilePoll,
  EthBeaconFilePoll,
  AdHocKeepAlive,
  /// Drives both halves of C5 -- subgraph-join invitations (spec.md
  /// §4.5.1) and local-swap candidate evaluation (§4.5.2).
  TreeMutationTick,
  LockExpiry,
  PingNeighbors,
  SafetyTick,
  /// Reserved slot for the out-of-scope HTML topology page (spec.md §1);
  /// the scheduler keeps the cadence available but no handler renders it.
  CloudPageRender,
  /// Reserved slot for disabling the HTML page when no one is watching.
  DisableCloudPage,
  /// Reserved slot for the out-of-scope wifi-scan renderer.
  WifiScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
  deadline: Instant,
  kind: EventKind,
  generation: u32,
}

impl PartialOrd for HeapEntry {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for HeapEntry {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.deadline.cmp(&other.deadline)
  }
}

/// Earliest-deadline scheduler over a fixed set of named event streams.
/// Each kind has at most one live deadline at a time; re-scheduling a kind
/// bumps its generation, tombstoning any stale heap entry.
#[derive(Debug, Default)]
pub struct Scheduler {
  heap: BinaryHeap<Reverse<HeapEntry>>,
  generation: HashMap<EventKind, u32>,
}

impl Scheduler {
  pub fn new() -> Self {
    Scheduler::default()
  }

  /// (Re)schedules `kind` for `deadline`, replacing any previous pending
  /// occurrence of the same kind.
  pub fn schedule(&mut self, kind: EventKind, deadline: Instant) {
    let gen = self.generation.entry(kind).or_insert(0);
    *gen += 1;
    self.heap.push(Reverse(HeapEntry { deadline, kind, generation: *gen }));
  }

  /// Cancels any pending occurrence of `kind` without scheduling a new one.
  pub fn cancel(&mut self, kind: EventKind) {
    let gen = self.generation.entry(kind).or_insert(0);
    *gen += 1;
  }

  fn purge_stale(&mut self) {
    while let Some(Reverse(top)) = self.heap.peek() {
      if self.generation.get(&top.kind) == Some(&top.generation) {
        break;
      }
      self.heap.pop();
    }
  }

  /// The next live deadline across every scheduled kind, or `None` if
  /// nothing is scheduled.
  pub fn next_deadline(&mut self) -> Option<Instant> {
    self.purge_stale();
    self.heap.peek().map(|Reverse(e)| e.deadline)
  }

  /// Pops every kind whose deadline has passed `now`, in deadline order.
  /// Callers that want a repeating stream must call `schedule` again for
  /// the kinds they receive.
  pub fn pop_ready(&mut self, now: Instant) -> Vec<EventKind> {
    let mut ready = Vec::new();
    loop {
      self.purge_stale();
      match self.heap.peek() {
        Some(Reverse(entry)) if entry.deadline <= now => {
          let Reverse(entry) = self.heap.pop().unwrap();
          ready.push(entry.kind);
        }
        _ => break,
      }
    }
    ready
  }
}

/// The OS thread that sleeps until the scheduler's next deadline and then
/// wakes the event loop. It never touches `MeshState` directly -- all
/// mutation happens back on the event-loop thread after `Poll::poll`
/// returns (spec.md §5's single-threaded-cooperative model).
pub struct TimerThread {
  deadline_tx: mpsc::Sender<Instant>,
  handle: Option<thread::JoinHandle<()>>,
}

impl TimerThread {
  pub fn spawn(waker: Arc<Waker>) -> Self {
    let (deadline_tx, deadline_rx) = mpsc::channel::<Instant>();
    let handle = thread::spawn(move || Self::run(waker, deadline_rx));
    TimerThread { deadline_tx, handle: Some(handle) }
  }

  /// Informs the timer thread of the next deadline it should wake the
  /// event loop for. Called by the event loop after every `Poll::poll`
  /// returns, once `Scheduler::next_deadline` has been recomputed.
  pub fn set_next_deadline(&self, deadline: Instant) {
    let _ = self.deadline_tx.send(deadline);
  }

  fn run(waker: Arc<Waker>, deadline_rx: mpsc::Receiver<Instant>) {
    let mut deadline = Instant::now() + SAFETY_INTERVAL;
    loop {
      let timeout = deadline.saturating_duration_since(Instant::now());
      match deadline_rx.recv_timeout(timeout) {
        Ok(new_deadline) => {
          deadline = new_deadline;
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
          if waker.wake().is_err() {
            return;
          }
          // Back off to the safety interval until the event loop tells us
          // the real next deadline after processing this wakeup.
          deadline = Instant::now() + SAFETY_INTERVAL;
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => return,
      }
    }
  }
}

impl Drop for TimerThread {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      // Dropping the sender unblocks `recv_timeout` with `Disconnected`.
      drop(std::mem::replace(&mut self.deadline_tx, mpsc::channel().0));
      let _ = handle.join();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pop_ready_returns_kinds_in_deadline_order() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    sched.schedule(EventKind::LockExpiry, now + Duration::from_millis(10));
    sched.schedule(EventKind::BeaconEmit, now + Duration::from_millis(5));
    let ready = sched.pop_ready(now + Duration::from_millis(20));
    assert_eq!(ready, vec![EventKind::BeaconEmit, EventKind::LockExpiry]);
  }

  #[test]
  fn rescheduling_tombstones_the_previous_deadline() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    sched.schedule(EventKind::AdHocKeepAlive, now + Duration::from_millis(5));
    sched.schedule(EventKind::AdHocKeepAlive, now + Duration::from_millis(50));
    let ready = sched.pop_ready(now + Duration::from_millis(10));
    assert!(ready.is_empty(), "stale entry should not fire");
    let ready = sched.pop_ready(now + Duration::from_millis(60));
    assert_eq!(ready, vec![EventKind::AdHocKeepAlive]);
  }

  #[test]
  fn cancel_removes_a_kind_without_scheduling_a_new_one() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    sched.schedule(EventKind::PingNeighbors, now + Duration::from_millis(5));
    sched.cancel(EventKind::PingNeighbors);
    let ready = sched.pop_ready(now + Duration::from_millis(10));
    assert!(ready.is_empty());
  }

  #[test]
  fn next_deadline_is_the_earliest_live_entry() {
    let mut sched = Scheduler::new();
    let now = Instant::now();
    sched.schedule(EventKind::WifiScan, now + Duration::from_secs(60));
    sched.schedule(EventKind::SafetyTick, now + Duration::from_secs(1));
    assert_eq!(sched.next_deadline(), Some(now + Duration::from_secs(1)));
  }
}
