//! JSONL event stream for missions and approvals, plus the `telemetry report`
//! reader that reconstructs per-mission outcomes from it.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// One line of the stream. Payload fields (`mission_id`, `request_id`, ...)
/// sit beside the envelope fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub ts_unix_ms: u64,
    pub event: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TelemetryRecord {
    fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct TelemetrySink {
    pub enabled: bool,
    pub path: PathBuf,
    pub run_id: String,
    pub command: String,
    pub user_id: String,
    writer: Arc<Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            enabled: cfg.telemetry_enabled,
            path: PathBuf::from(&cfg.telemetry_path),
            run_id: new_run_id(),
            command,
            user_id: cfg.user_id.clone(),
            writer: Arc::default(),
        }
    }

    pub fn disabled(command: &str) -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            run_id: new_run_id(),
            command: command.to_string(),
            user_id: String::new(),
            writer: Arc::default(),
        }
    }

    /// Append one record. Failures are logged and never reach the caller.
    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let record = TelemetryRecord {
            ts_unix_ms: unix_ms_now(),
            event: event.to_string(),
            run_id: self.run_id.clone(),
            command: self.command.clone(),
            user_id: self.user_id.clone(),
            payload: match payload {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => Map::from_iter([("value".to_string(), other)]),
            },
        };
        if let Err(err) = self.append(&record) {
            tracing::warn!(event, path = %self.path.display(), error = %err, "telemetry write failed");
        }
    }

    fn append(&self, record: &TelemetryRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to encode telemetry record")?;
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create telemetry directory '{}'", dir.display()))?;
        }

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open telemetry path '{}'", self.path.display()))?;
        writeln!(file, "{line}").context("failed to append telemetry record")
    }
}

fn new_run_id() -> String {
    format!("run-{}-{}", unix_ms_now(), std::process::id())
}

/// What the stream says about one mission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissionTrack {
    /// `running` until a `mission.completed` or `mission.failed` record.
    pub status: String,
    pub failure: Option<String>,
    pub approvals: Vec<(String, String)>,
    pub failed_roles: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub runs: usize,
    pub command_failed: usize,
    pub missions: BTreeMap<String, MissionTrack>,
    /// Requests opened in the window with no decision record, keyed by id.
    pub unanswered_approvals: BTreeMap<String, String>,
    pub last_event_ts_unix_ms: Option<u64>,
}

impl TelemetrySummary {
    pub fn missions_with_status(&self, status: &str) -> usize {
        self.missions
            .values()
            .filter(|mission| mission.status == status)
            .count()
    }

    pub fn decisions(&self, decision: &str) -> usize {
        self.missions
            .values()
            .flat_map(|mission| mission.approvals.iter())
            .filter(|(_, answered)| answered == decision)
            .count()
    }

    fn track(&mut self, mission_id: &str) -> &mut MissionTrack {
        self.missions
            .entry(mission_id.to_string())
            .or_insert_with(|| MissionTrack {
                status: "running".to_string(),
                ..MissionTrack::default()
            })
    }

    fn apply(&mut self, record: &TelemetryRecord) {
        let mission_id = record.field("mission_id").map(str::to_string);
        let request_id = record.field("request_id").map(str::to_string);

        match (record.event.as_str(), mission_id) {
            ("command.failed", _) => self.command_failed += 1,
            ("mission.started", Some(id)) => {
                self.track(&id);
            }
            ("mission.completed", Some(id)) => self.track(&id).status = "completed".to_string(),
            ("mission.failed", Some(id)) => {
                let failure = record
                    .payload
                    .get("reason")
                    .and_then(|reason| reason.get("kind"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let track = self.track(&id);
                track.status = "failed".to_string();
                track.failure = failure;
            }
            ("role.failed", Some(id)) => {
                if let Some(role) = record.field("role") {
                    self.track(&id).failed_roles.push(role.to_string());
                }
            }
            ("approval.opened", Some(id)) => {
                if let Some(request_id) = request_id {
                    self.track(&id);
                    self.unanswered_approvals.insert(request_id, id);
                }
            }
            (event, Some(id)) if event.starts_with("approval.") => {
                let decision = event.trim_start_matches("approval.").to_string();
                if let Some(request_id) = request_id {
                    self.unanswered_approvals.remove(&request_id);
                    self.track(&id).approvals.push((request_id, decision));
                }
            }
            _ => {}
        }
    }
}

/// Fold the newest `limit` lines, oldest first, so approval answers close the
/// requests opened before them.
pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary {
        total_lines: lines.len(),
        ..TelemetrySummary::default()
    };
    let skip = lines.len().saturating_sub(limit.max(1));
    let mut runs = std::collections::BTreeSet::new();

    for line in lines.iter().skip(skip).map(|line| line.trim()) {
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<TelemetryRecord>(line) else {
            summary.parse_errors += 1;
            continue;
        };
        summary.parsed_events += 1;
        if !record.run_id.is_empty() {
            runs.insert(record.run_id.clone());
        }
        summary.last_event_ts_unix_ms = summary
            .last_event_ts_unix_ms
            .max(Some(record.ts_unix_ms));
        summary.apply(&record);
    }

    summary.runs = runs.len();
    summary
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let summary = summarize_telemetry_lines(read_lines(&path)?, limit);

    println!("Telemetry report for {}", path.display());
    println!(
        "Events: {} analyzed of {} lines (parse_errors={}), runs={}, failed commands={}",
        summary.parsed_events,
        summary.total_lines,
        summary.parse_errors,
        summary.runs,
        summary.command_failed
    );
    println!(
        "Missions: {} seen, completed={} failed={} unfinished={}",
        summary.missions.len(),
        summary.missions_with_status("completed"),
        summary.missions_with_status("failed"),
        summary.missions_with_status("running")
    );
    println!(
        "Approval decisions: approved={} rejected={} cancelled={}",
        summary.decisions("approved"),
        summary.decisions("rejected"),
        summary.decisions("cancelled")
    );

    let failed = summary
        .missions
        .iter()
        .filter(|(_, mission)| mission.status == "failed")
        .collect::<Vec<_>>();
    if !failed.is_empty() {
        println!("Failed missions:");
        for (id, mission) in failed {
            let roles = if mission.failed_roles.is_empty() {
                String::new()
            } else {
                format!(" roles={}", mission.failed_roles.join(","))
            };
            println!(
                "- {id}: {}{roles}",
                mission.failure.as_deref().unwrap_or("unknown")
            );
        }
    }

    if !summary.unanswered_approvals.is_empty() {
        println!("Approval requests without a decision:");
        for (request_id, mission_id) in &summary.unanswered_approvals {
            println!("- {request_id} (mission {mission_id})");
        }
    }

    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        println!("Last event ts_unix_ms: {last_ts}");
    }

    Ok(())
}
