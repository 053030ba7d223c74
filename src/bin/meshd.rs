//! Thin binary wiring up logging, CLI parsing, and the `mio` event loop
//! around [`meshd::MeshState`] (SPEC_FULL.md §0: "the binary wires up
//! logging, CLI parsing, and the OS-level event loop"). Raw-socket framing
//! is out of scope (spec.md §1) -- no [`meshd::Transport`] is registered
//! here, so this binary drives the protocol's timers and file-polling
//! side faithfully but sends nothing onto a real wire. A real deployment
//! plugs a `Transport` impl into [`meshd::EventLoop::registry`] and drains
//! `MeshState::outbox` / `MeshState::payload_outbox` after every
//! `poll_once`.

use std::fs;
use std::io::Write as _;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;

use meshd::config::{self, Cli, DebugVector};
use meshd::{EventLoop, MeshState};

/// The `{box_count, local_weakest_link, weak_box_count}` summary consumed
/// by the out-of-scope front-panel LED daemon (spec.md §6 "Persistent
/// files produced"). `generated_at` lets a stale file (daemon wedged or
/// dead) be told apart from a genuinely quiet mesh.
#[derive(Serialize)]
struct LedStatus {
  box_count: usize,
  local_weakest_link: u8,
  weak_box_count: usize,
  generated_at: chrono::DateTime<chrono::Utc>,
}

fn write_status_file(path: &std::path::Path, status: &LedStatus) -> std::io::Result<()> {
  let tmp = path.with_extension("tmp");
  {
    let mut f = fs::File::create(&tmp)?;
    f.write_all(serde_json::to_string(status).unwrap().as_bytes())?;
  }
  fs::rename(&tmp, path)
}

fn poll_neighbor_files(state: &mut MeshState, cli: &Cli) {
  let sig_entries = match fs::read_to_string(&cli.sig_strength_file) {
    Ok(contents) => config::parse_sig_strength_file(&contents).unwrap_or_else(|e| {
      log::warn!("{}: {e}", cli.sig_strength_file.display());
      Vec::new()
    }),
    Err(e) => {
      log::warn!("could not read {}: {e}", cli.sig_strength_file.display());
      Vec::new()
    }
  };
  let eth_entries = match &cli.eth_beacons_file {
    Some(path) => match fs::read_to_string(path) {
      Ok(contents) => config::parse_eth_beacons_file(&contents).unwrap_or_else(|e| {
        log::warn!("{}: {e}", path.display());
        Vec::new()
      }),
      Err(e) => {
        log::warn!("could not read {}: {e}", path.display());
        Vec::new()
      }
    },
    None => Vec::new(),
  };
  state.reconcile_neighbors(&sig_entries, &eth_entries);
}

fn main() -> std::io::Result<()> {
  env_logger::init();
  let cli = Cli::parse();

  let debug = match &cli.debug_vector_file {
    Some(path) => config::DebugVector::load_from_command_file(path).unwrap_or_else(|e| {
      log::warn!("ignoring debug vector file: {e}");
      DebugVector::default()
    }),
    None => DebugVector::default(),
  };

  let (mut state, status_rx) = MeshState::new(cli.my_name, None, debug)
    .expect("failed to set up the status-event channel");

  log::info!("meshd starting as {} on {}", cli.my_name, cli.wireless_device);

  let mut event_loop = EventLoop::new().expect("failed to set up the event loop");
  let now = Instant::now();
  state.bootstrap_schedule(now);
  poll_neighbor_files(&mut state, &cli);

  let mut last_file_poll = now;
  let mut last_status_write = now;

  loop {
    event_loop.poll_once(&mut state, Some(Duration::from_millis(200)))?;

    while let Ok(event) = status_rx.try_recv() {
      log::debug!("status event: {event:?}");
    }

    let now = Instant::now();
    if now.duration_since(last_file_poll) >= Duration::from_secs(2) {
      poll_neighbor_files(&mut state, &cli);
      last_file_poll = now;
    }

    if let Some(path) = &cli.status_output_file {
      if now.duration_since(last_status_write) >= Duration::from_secs(5) {
        let weakest = state.links.iter().map(|l| l.signal_strength_snapshot).min().unwrap_or(0);
        let status = LedStatus {
          box_count: state.beacons.len() + 1,
          local_weakest_link: weakest,
          weak_box_count: state.links.iter().filter(|l| l.signal_strength_snapshot < meshd::neighbor::WEAK_THRESHOLD).count(),
          generated_at: chrono::Utc::now(),
        };
        if let Err(e) = write_status_file(path, &status) {
          log::warn!("could not write status file {}: {e}", path.display());
        }
        last_status_write = now;
      }
    }

    for (device, frame) in state.outbox.drain(..) {
      log::trace!("(no transport registered) would send {:?} to {device}", frame.message_type);
    }
    for (device, _payload) in state.payload_outbox.drain(..) {
      log::trace!("(no transport registered) would send payload to {device}");
    }
  }
}
