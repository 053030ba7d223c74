//! Runtime configuration: the CLI surface (spec.md §6 "CLI surface"), the
//! remotely-tweakable debug vector, and the hand-rolled parsers for the
//! three fixed-format files the daemon polls (spec.md §6 "Persistent files
//! consumed"). The file grammars are small and fixed, so these are
//! hand-written line parsers rather than a generic parser crate.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::error::MeshError;
use crate::mac::MacAddress;

/// Operating mode selects whether plain 802.11 stations are admitted as
/// ad-hoc clients or the box only speaks WDS to other boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperatingMode {
  AdHoc,
  Wds,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "meshd", about = "Self-organizing wireless mesh control-plane daemon")]
pub struct Cli {
  /// This box's one true name: the wireless MAC identifying it on the
  /// mesh. Reading this off the wireless interface is the out-of-scope
  /// raw-socket layer's job (spec.md §1); the thin binary takes it
  /// directly instead of shelling out to discover it.
  #[arg(long)]
  pub my_name: MacAddress,

  /// Wireless interface this box beacons and negotiates tree edges on.
  #[arg(long)]
  pub wireless_device: String,

  /// Optional wired interface used for the eth-beacon discovery source.
  #[arg(long)]
  pub wired_device: Option<String>,

  /// File of currently-associated wireless peers and their signal strength.
  #[arg(long)]
  pub sig_strength_file: PathBuf,

  /// File of peers reached by wired discovery beacons.
  #[arg(long)]
  pub eth_beacons_file: Option<PathBuf>,

  /// WDS interface-name / MAC pair configuration file.
  #[arg(long)]
  pub wds_file: Option<PathBuf>,

  /// Where to write the `{box_count, local_weakest_link, weak_box_count}`
  /// status summary consumed by the (out-of-scope) LED daemon.
  #[arg(long)]
  pub status_output_file: Option<PathBuf>,

  #[arg(long, value_enum, default_value = "ad-hoc")]
  pub mode: OperatingMode,

  /// Directory of named pipes used in place of raw sockets for local
  /// simulation; when set, the (out-of-scope) simulated transport is
  /// expected to be wired up by the caller rather than this crate.
  #[arg(long)]
  pub sim_pipe_dir: Option<PathBuf>,

  /// One-line local command file toggling debug-vector options at startup.
  #[arg(long)]
  pub debug_vector_file: Option<PathBuf>,
}

/// One entry of the runtime-mutable `db[]` (spec.md §6, REDESIGN FLAG
/// "configuration struct with enumerated options" in spec.md §9). The index
/// of each variant is the index used by the beacon's `tweak_db` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum DebugOption {
  SequenceFlowControl = 0,
  AdHocClientMode = 1,
  CloudPageAnnounce = 2,
  DisableLocalWirelessTransmit = 3,
  ScaleTimersByMeshSize = 4,
  ScaleTimersDebug20x = 5,
  DuplicateSuppressionOnForward = 6,
}

impl DebugOption {
  const ALL: [DebugOption; 7] = [
    DebugOption::SequenceFlowControl,
    DebugOption::AdHocClientMode,
    DebugOption::CloudPageAnnounce,
    DebugOption::DisableLocalWirelessTransmit,
    DebugOption::ScaleTimersByMeshSize,
    DebugOption::ScaleTimersDebug20x,
    DebugOption::DuplicateSuppressionOnForward,
  ];

  fn from_index(i: usize) -> Option<DebugOption> {
    DebugOption::ALL.get(i).copied()
  }

  pub fn description(&self) -> &'static str {
    match self {
      DebugOption::SequenceFlowControl => "lock-step SEQUENCE/ACK-SEQUENCE flow control on payload sends",
      DebugOption::AdHocClientMode => "admit plain 802.11 stations as ad-hoc clients",
      DebugOption::CloudPageAnnounce => "include this box in the cloud topology page",
      DebugOption::DisableLocalWirelessTransmit => "suppress all local wireless transmission",
      DebugOption::ScaleTimersByMeshSize => "scale beacon/lock timers by current mesh size",
      DebugOption::ScaleTimersDebug20x => "multiply mesh-size timer scaling by 20, for debugging",
      DebugOption::DuplicateSuppressionOnForward => "suppress re-forwarding of already-seen payloads",
    }
  }
}

/// The debug vector itself: a small set of named booleans, remotely
/// tweakable via a beacon's `tweak_db` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugVector {
  bits: [bool; 7],
}

impl Default for DebugVector {
  fn default() -> Self {
    let mut bits = [false; 7];
    bits[DebugOption::AdHocClientMode as usize] = true;
    bits[DebugOption::CloudPageAnnounce as usize] = true;
    DebugVector { bits }
  }
}

impl DebugVector {
  pub fn get(&self, option: DebugOption) -> bool {
    self.bits[option as usize]
  }

  pub fn set(&mut self, option: DebugOption, value: bool) {
    self.bits[option as usize] = value;
  }

  pub fn toggle(&mut self, option: DebugOption) {
    let idx = option as usize;
    self.bits[idx] = !self.bits[idx];
  }

  /// Apply the beacon `tweak_db` / local-command-file encoding: `1000+i`
  /// forces option `i` false, `2000+i` forces it true, anything else in
  /// range is the raw index and toggles it (spec.md §6).
  pub fn apply_tweak(&mut self, code: u16) {
    let (index, action) = if code >= 2000 {
      ((code - 2000) as usize, Some(true))
    } else if code >= 1000 {
      ((code - 1000) as usize, Some(false))
    } else {
      (code as usize, None)
    };
    let Some(option) = DebugOption::from_index(index) else {
      log::warn!("ignoring tweak_db code {code}: no such debug option index {index}");
      return;
    };
    match action {
      Some(value) => self.set(option, value),
      None => self.toggle(option),
    }
  }

  pub fn load_from_command_file(path: &Path) -> Result<DebugVector, MeshError> {
    let mut vector = DebugVector::default();
    let contents = fs::read_to_string(path).map_err(|source| MeshError::ConfigRead {
      path: path.to_path_buf(),
      source,
    })?;
    if let Some(line) = contents.lines().find(|l| !l.trim().is_empty()) {
      let code: u16 = line.trim().parse().map_err(|_| MeshError::ConfigParse {
        path: path.to_path_buf(),
        line: 1,
        reason: format!("expected an integer tweak code, found {line:?}"),
      })?;
      vector.apply_tweak(code);
    }
    Ok(vector)
  }
}

/// One line of the signal-strength neighbor source
/// (spec.md §6 "A neighbor signal-strength file").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigStrengthEntry {
  pub mac: MacAddress,
  pub signal: u8,
  pub channel: Option<u32>,
  pub noise: Option<i32>,
  pub rate: Option<u32>,
}

/// One line of the eth-beacons file: an Ethernet MAC paired with the
/// wireless MAC it was seen beaconing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthBeaconEntry {
  pub eth_mac: MacAddress,
  pub wireless_mac: MacAddress,
}

/// One line of the WDS configuration file: an interface name bound to a
/// peer MAC. Comment lines beginning `#` are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WdsEntry {
  pub interface: String,
  pub mac: MacAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileParseError {
  pub line: usize,
}

impl fmt::Display for FileParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "malformed entry on line {}", self.line)
  }
}

pub fn parse_sig_strength_file(contents: &str) -> Result<Vec<SigStrengthEntry>, FileParseError> {
  let mut out = Vec::new();
  for (idx, raw) in contents.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let mut fields = line.split_whitespace();
    let mac: MacAddress = fields.next().and_then(|s| s.parse().ok()).ok_or(FileParseError { line: idx + 1 })?;
    let signal: u8 = fields.next().and_then(|s| s.parse().ok()).ok_or(FileParseError { line: idx + 1 })?;
    let channel = fields.next().and_then(|s| s.parse().ok());
    let noise = fields.next().and_then(|s| s.parse().ok());
    let rate = fields.next().and_then(|s| s.parse().ok());
    out.push(SigStrengthEntry { mac, signal, channel, noise, rate });
  }
  Ok(out)
}

pub fn parse_eth_beacons_file(contents: &str) -> Result<Vec<EthBeaconEntry>, FileParseError> {
  let mut out = Vec::new();
  for (idx, raw) in contents.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let mut fields = line.split_whitespace();
    let eth_mac: MacAddress =
      fields.next().and_then(|s| s.parse().ok()).ok_or(FileParseError { line: idx + 1 })?;
    let wireless_mac: MacAddress =
      fields.next().and_then(|s| s.parse().ok()).ok_or(FileParseError { line: idx + 1 })?;
    out.push(EthBeaconEntry { eth_mac, wireless_mac });
  }
  Ok(out)
}

pub fn parse_wds_file(contents: &str) -> Result<Vec<WdsEntry>, FileParseError> {
  let mut out = Vec::new();
  for (idx, raw) in contents.lines().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let mut fields = line.split_whitespace();
    let interface = fields.next().ok_or(FileParseError { line: idx + 1 })?.to_string();
    let mac: MacAddress = fields.next().and_then(|s| s.parse().ok()).ok_or(FileParseError { line: idx + 1 })?;
    out.push(WdsEntry { interface, mac });
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tweak_codes_force_and_toggle() {
    let mut db = DebugVector::default();
    assert!(!db.get(DebugOption::DisableLocalWirelessTransmit));
    db.apply_tweak(2003); // force true
    assert!(db.get(DebugOption::DisableLocalWirelessTransmit));
    db.apply_tweak(1003); // force false
    assert!(!db.get(DebugOption::DisableLocalWirelessTransmit));
    db.apply_tweak(3); // toggle
    assert!(db.get(DebugOption::DisableLocalWirelessTransmit));
  }

  #[test]
  fn unknown_tweak_index_is_ignored_not_fatal() {
    let mut db = DebugVector::default();
    db.apply_tweak(9999);
    assert_eq!(db, DebugVector::default());
  }

  #[test]
  fn parses_sig_strength_lines_with_optional_trailing_fields() {
    let text = "00:11:22:33:44:55 200\n66:77:88:99:aa:bb 150 6 -70 54\n# comment\n\n";
    let entries = parse_sig_strength_file(text).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].signal, 200);
    assert_eq!(entries[1].channel, Some(6));
    assert_eq!(entries[1].rate, Some(54));
  }

  #[test]
  fn parses_wds_file_skipping_comments() {
    let text = "# wds config\nwds0 00:11:22:33:44:55\nwds1 66:77:88:99:aa:bb\n";
    let entries = parse_wds_file(text).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].interface, "wds0");
  }

  #[test]
  fn rejects_malformed_mac_with_line_number() {
    let text = "00:11:22:33:44:55 200\nnot-a-mac 150\n";
    let err = parse_sig_strength_file(text).unwrap_err();
    assert_eq!(err.line, 2);
  }
}
