//! `MeshState`: the single record threading all nine components through the
//! event loop (REDESIGN FLAG, spec.md §9: "no global mutable state"), and
//! the `mio`-driven event loop itself: one `Poll`, one `Waker`-backed
//! self-pipe, timed events drained after every `poll` returns (spec.md §5).

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};

use crate::ad_hoc::AdHocClientTable;
use crate::beacon_table::{ReceivedBeaconTable, ScalingPolicy};
use crate::config::DebugOption;
use crate::config::DebugVector;
use crate::forwarder::Forwarder;
use crate::lock::LockTable;
use crate::mac::MacAddress;
use crate::neighbor::NeighborTable;
use crate::random_eval::RandomEval;
use crate::scheduler::{EventKind, Scheduler, TimerThread, SAFETY_INTERVAL};
use crate::status_events::{sync_status_channel, MeshStatusEvent, StatusChannelReceiver, StatusChannelSender};
use crate::wire::{ControlFrame, PayloadMessage};

pub const TIMER_WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Boundary the core is driven through. Raw-socket framing and the
/// simulated-pipe transport are out of scope (spec.md §1); this trait is
/// the seam a real implementation plugs into.
pub trait Transport {
  fn send_control(&mut self, device: MacAddress, destination: MacAddress, frame: &ControlFrame) -> io::Result<()>;
  fn send_payload(&mut self, device: MacAddress, payload: &PayloadMessage) -> io::Result<()>;
  fn as_source(&mut self) -> &mut dyn mio::event::Source;
  fn token(&self) -> Token;
}

/// The mesh-state record. Every table a component owns is a plain field;
/// nothing here is `extern`/global (spec.md §9).
pub struct MeshState {
  pub my_name: MacAddress,
  pub my_eth_name: Option<MacAddress>,
  pub neighbors: NeighborTable,
  pub beacons: ReceivedBeaconTable,
  pub locks: LockTable,
  pub links: crate::stp_link::StpLinkList,
  pub ad_hoc: AdHocClientTable,
  pub forwarder: Forwarder,
  pub scheduler: Scheduler,
  pub rng: RandomEval,
  pub debug: DebugVector,
  pub beacon_seq: u16,
  pub link_seq_counters: HashMap<MacAddress, u8>,
  pub status_tx: StatusChannelSender<MeshStatusEvent>,
  pub scaling_policy: ScalingPolicy,
  pub outbox: Vec<(MacAddress, ControlFrame)>,
  pub payload_outbox: Vec<(MacAddress, PayloadMessage)>,
  /// The single in-flight local swap this box may be the initiator of
  /// (spec.md §4.5.2); `None` whenever no swap is underway.
  pub pending_swap: Option<crate::tree_mutation::PendingSwap>,
}

impl MeshState {
  pub fn new(my_name: MacAddress, my_eth_name: Option<MacAddress>, debug: DebugVector) -> io::Result<(Self, StatusChannelReceiver<MeshStatusEvent>)> {
    let (status_tx, status_rx) = sync_status_channel(256)?;
    let scaling_policy =
      if debug.get(DebugOption::ScaleTimersByMeshSize) { ScalingPolicy::ByMeshSize } else { ScalingPolicy::Fixed };
    let state = MeshState {
      my_name,
      my_eth_name,
      neighbors: NeighborTable::new(),
      beacons: ReceivedBeaconTable::new(),
      locks: LockTable::new(),
      links: crate::stp_link::StpLinkList::new(),
      ad_hoc: AdHocClientTable::new(),
      forwarder: Forwarder::new(),
      scheduler: Scheduler::new(),
      rng: RandomEval::new(my_name),
      debug,
      beacon_seq: 0,
      link_seq_counters: HashMap::new(),
      status_tx,
      scaling_policy,
      outbox: Vec::new(),
      payload_outbox: Vec::new(),
      pending_swap: None,
    };
    Ok((state, status_rx))
  }

  pub fn next_link_seq(&mut self, peer: MacAddress) -> u8 {
    let counter = self.link_seq_counters.entry(peer).or_insert(0);
    let seq = *counter;
    *counter = counter.wrapping_add(1);
    seq
  }

  pub fn queue_send(&mut self, device: MacAddress, frame: ControlFrame) {
    self.outbox.push((device, frame));
  }

  pub fn queue_payload_send(&mut self, device: MacAddress, payload: PayloadMessage) {
    self.payload_outbox.push((device, payload));
  }

  fn notify(&self, event: MeshStatusEvent) {
    let _ = self.status_tx.try_send(event);
  }

  pub(crate) fn emit(&self, event: MeshStatusEvent) {
    self.notify(event);
  }

  /// Reconciles C1 against freshly re-read copies of the two neighbor
  /// source files (spec.md §4.1) and emits [`MeshStatusEvent::NeighborTableChanged`]
  /// when the reconciliation actually changed anything. File I/O itself is
  /// the caller's concern (the binary's poll loop); this just keeps the
  /// "change is reported as a boolean to upper layers" rule (spec.md §4.1)
  /// inside the crate instead of leaking `pub(crate)` internals out to it.
  pub fn reconcile_neighbors(
    &mut self,
    sig_entries: &[crate::config::SigStrengthEntry],
    eth_entries: &[crate::config::EthBeaconEntry],
  ) {
    if self.neighbors.reconcile(sig_entries, eth_entries) {
      self.emit(MeshStatusEvent::NeighborTableChanged);
    }
  }

  /// Runs every periodic sweep and protocol tick named in spec.md §4,
  /// called once per scheduler-driven `EventKind`.
  pub fn handle_timer(&mut self, kind: EventKind, now: Instant) {
    match kind {
      EventKind::BeaconEmit => {
        self.emit_beacon_to_all_links();
        self.reschedule_beacon(now);
      }
      EventKind::NeighborFilePoll | EventKind::EthBeaconFilePoll => {
        // File re-reads are driven by the binary's CLI-configured paths;
        // the daemon-core side is `NeighborTable::reconcile`, called by
        // the binary's poll loop with freshly read file contents.
      }
      EventKind::AdHocKeepAlive => {
        self.run_ad_hoc_optimization(now);
        self.scheduler.schedule(EventKind::AdHocKeepAlive, now + Duration::from_millis(750));
      }
      EventKind::TreeMutationTick => {
        self.check_connectivity(now);
        self.local_swap_tick(now);
        self.scheduler.schedule(EventKind::TreeMutationTick, now + Duration::from_millis(500));
      }
      EventKind::LockExpiry => {
        self.expire_locks(now);
      }
      EventKind::PingNeighbors => {
        self.scheduler.schedule(EventKind::PingNeighbors, now + Duration::from_millis(1500));
      }
      EventKind::SafetyTick => {
        self.scheduler.schedule(EventKind::SafetyTick, now + SAFETY_INTERVAL);
      }
      EventKind::CloudPageRender | EventKind::DisableCloudPage | EventKind::WifiScan => {
        // Reserved slots for out-of-scope consumers (spec.md §1); no
        // handler acts on them in this crate.
      }
    }

    let expired_beacons = self.beacons.expire(now, self.scaling_policy);
    for origin in expired_beacons {
      self.emit(MeshStatusEvent::BeaconTimedOut { origin });
      let affected = self.ad_hoc.mark_unserved(origin);
      for station in affected {
        self.emit(MeshStatusEvent::AdHocClientLost { station });
      }
    }
  }

  fn reschedule_beacon(&mut self, now: Instant) {
    use crate::random_eval::MEAN_WAKEUP_TIME_MS;
    let scale = if self.debug.get(DebugOption::ScaleTimersByMeshSize) {
      self.beacons.len().max(1) as f64
    } else {
      1.0
    };
    let wait_ms = self.rng.neg_exp(MEAN_WAKEUP_TIME_MS * scale);
    self.scheduler.schedule(EventKind::BeaconEmit, now + Duration::from_millis(wait_ms.max(1.0) as u64));
  }

  /// Re-arms `EventKind::LockExpiry` for the earliest outstanding lock
  /// deadline. Cheap to call after every lock-table mutation: scheduling
  /// the same kind again just tombstones the previous entry
  /// ([`Scheduler::schedule`]).
  pub(crate) fn arm_lock_expiry(&mut self) {
    if let Some(next) = self.locks.next_deadline() {
      self.scheduler.schedule(EventKind::LockExpiry, next);
    }
  }

  fn expire_locks(&mut self, now: Instant) {
    for (list, record) in self.locks.expire(now) {
      self.run_post_timeout_hook(list, &record);
    }
    if let Some(next) = self.locks.next_deadline() {
      self.scheduler.schedule(EventKind::LockExpiry, next);
    }
  }

  fn run_post_timeout_hook(&mut self, list: crate::lock::LockList, record: &crate::lock::LockRecord) {
    use crate::status_events::LockKindTag;
    self.emit(MeshStatusEvent::LockTimedOut { kind: LockKindTag::from(&record.kind), peer: record.peer });
    match (&record.kind, list) {
      (crate::lock::LockKind::StpAddReq, _) => {
        // Deliberately cheap to fail (spec.md §4.5.1): nothing further to do.
      }
      (crate::lock::LockKind::LockReqOld { .. } | crate::lock::LockKind::LockReqNew { .. }, _) => {
        self.clear_stp_update_state();
      }
      (crate::lock::LockKind::StpBeaconAck { beacon }, crate::lock::LockList::Granted) => {
        // retry-on-timeout is opt-in (spec.md §9 "optional 'retry' build");
        // default behavior is just to drop, which has already happened.
        let _ = beacon;
      }
      _ => {}
    }
  }

  /// Schedules the first occurrence of every self-repeating timer stream.
  /// Called once by the binary after constructing a fresh `MeshState`;
  /// `LockExpiry` is deliberately absent -- it is scheduled lazily, the
  /// first time a lock is actually added (spec.md §4.3).
  pub fn bootstrap_schedule(&mut self, now: Instant) {
    self.reschedule_beacon(now);
    self.scheduler.schedule(EventKind::TreeMutationTick, now + Duration::from_millis(500));
    self.scheduler.schedule(EventKind::AdHocKeepAlive, now + Duration::from_millis(750));
    self.scheduler.schedule(EventKind::PingNeighbors, now + Duration::from_millis(1500));
    self.scheduler.schedule(EventKind::SafetyTick, now + SAFETY_INTERVAL);
  }

  /// Collapses any in-flight tree-mutation protocol: release messages to
  /// every owned-lock peer, then clear lock state (spec.md §4.5.2 step 5).
  pub fn clear_stp_update_state(&mut self) {
    use crate::wire::{ControlBody, MessageType};
    let released = self.locks.clear_stp_update_state();
    for record in released {
      let frame = ControlFrame::new(record.peer, MessageType::LocalLockRelease, ControlBody::Empty);
      self.queue_send(record.peer, frame);
    }
  }
}

/// Drives `MeshState` against one or more `Transport`s. This is the
/// `mio`-based cooperative loop spec.md §5 describes; signal handling is
/// reduced to `TimerThread` calling `Waker::wake`, and all table mutation
/// happens here, after `Poll::poll` returns.
pub struct EventLoop {
  poll: Poll,
  timer: TimerThread,
}

impl EventLoop {
  pub fn new() -> io::Result<Self> {
    let poll = Poll::new()?;
    let waker = Arc::new(Waker::new(poll.registry(), TIMER_WAKER_TOKEN)?);
    let timer = TimerThread::spawn(waker);
    Ok(EventLoop { poll, timer })
  }

  pub fn registry(&self) -> &mio::Registry {
    self.poll.registry()
  }

  /// Runs one iteration: wait for I/O or a timer wakeup, then let the
  /// caller process ready transports and due timer events. Returns once a
  /// `Poll::poll` call has returned (ordering guarantee spec.md §5:
  /// deliver-incoming before timed events).
  pub fn poll_once(&mut self, state: &mut MeshState, timeout: Option<Duration>) -> io::Result<Events> {
    let mut events = Events::with_capacity(128);
    self.poll.poll(&mut events, timeout)?;

    let now = Instant::now();
    for kind in state.scheduler.pop_ready(now) {
      state.handle_timer(kind, now);
    }
    if let Some(next) = state.scheduler.next_deadline() {
      self.timer.set_next_deadline(next);
    }

    Ok(events)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_state_starts_with_empty_tables() {
    let (state, _rx) = MeshState::new(MacAddress([1; 6]), None, DebugVector::default()).unwrap();
    assert_eq!(state.neighbors.len(), 0);
    assert_eq!(state.links.len(), 0);
    assert!(!state.locks.doing_stp_update());
  }

  #[test]
  fn clear_stp_update_state_queues_release_messages() {
    let (mut state, _rx) = MeshState::new(MacAddress([1; 6]), None, DebugVector::default()).unwrap();
    let peer = MacAddress([2; 6]);
    state.locks.add_pending(peer, crate::lock::LockKind::LockReqOld { other: peer }, Instant::now()).unwrap();
    state.locks.accept_grant(peer, &crate::lock::LockKind::LockReqOld { other: peer }, Instant::now());
    state.clear_stp_update_state();
    assert_eq!(state.outbox.len(), 1);
    assert!(!state.locks.doing_stp_update());
  }
}
