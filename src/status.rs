// 📡 Import Status - progress of long-running imports
//
// A run is identified by an opaque UUID. Status lives outside the database
// transaction (JSON files by default) so a caller can poll it while rows are
// still being written, and a failed import still leaves its status behind.

use crate::error::{FailureKind, ImportError, Result};
use crate::workbook::SourceFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

// ============================================================================
// PHASES
// ============================================================================

/// Orchestrator state machine
///
/// Idle → StagingConversion → SchemaDiscovery → RowProcessing
///      → RelationshipReconciliation → Completed
///
/// Failed is reachable from parameter validation, StagingConversion and
/// SchemaDiscovery only. Row failures never fail a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    StagingConversion,
    SchemaDiscovery,
    RowProcessing,
    RelationshipReconciliation,
    Completed,
    Failed,
}

impl ImportPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Idle => "idle",
            ImportPhase::StagingConversion => "staging_conversion",
            ImportPhase::SchemaDiscovery => "schema_discovery",
            ImportPhase::RowProcessing => "row_processing",
            ImportPhase::RelationshipReconciliation => "relationship_reconciliation",
            ImportPhase::Completed => "completed",
            ImportPhase::Failed => "failed",
        }
    }

    /// Phases that do work and get timed
    pub const WORKING: [ImportPhase; 4] = [
        ImportPhase::StagingConversion,
        ImportPhase::SchemaDiscovery,
        ImportPhase::RowProcessing,
        ImportPhase::RelationshipReconciliation,
    ];

    /// Legal successor?
    pub fn can_advance_to(&self, next: ImportPhase) -> bool {
        use ImportPhase::*;
        matches!(
            (self, next),
            (Idle, StagingConversion)
                | (Idle, SchemaDiscovery)
                | (Idle, Failed)
                | (StagingConversion, SchemaDiscovery)
                | (StagingConversion, Failed)
                | (SchemaDiscovery, RowProcessing)
                | (SchemaDiscovery, Failed)
                | (RowProcessing, RelationshipReconciliation)
                | (RelationshipReconciliation, Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub state: PhaseState,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

impl Default for PhaseRecord {
    fn default() -> Self {
        PhaseRecord {
            state: PhaseState::Pending,
            started_at: None,
            duration_secs: None,
        }
    }
}

// ============================================================================
// STATUS RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub run_id: String,
    pub file_name: String,
    pub file_size_mb: f64,
    pub file_type: String,
    pub state: RunState,
    pub phase: ImportPhase,
    pub progress: u8,
    pub current_step: String,
    pub estimated_duration_minutes: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_secs: Option<f64>,
    pub phases: BTreeMap<String, PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl StatusRecord {
    pub fn new(file_name: &str, file_size_mb: f64) -> Self {
        let format = SourceFormat::from_path(std::path::Path::new(file_name));
        let file_type = format.map(|f| f.label()).unwrap_or("UNKNOWN").to_string();
        let phases = ImportPhase::WORKING
            .iter()
            .map(|p| (p.as_str().to_string(), PhaseRecord::default()))
            .collect();

        StatusRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            file_size_mb,
            estimated_duration_minutes: estimate_duration_minutes(file_size_mb, format),
            file_type,
            state: RunState::Starting,
            phase: ImportPhase::Idle,
            progress: 0,
            current_step: "Starting import process".to_string(),
            started_at: Utc::now(),
            last_updated: None,
            ended_at: None,
            total_duration_secs: None,
            phases,
            stats: None,
            error: None,
            failure_kind: None,
        }
    }

    fn update_phase(&mut self, phase: ImportPhase, step: &str, progress: Option<u8>) {
        let now = Utc::now();
        if self.phase != phase && !self.phase.can_advance_to(phase) {
            debug!(
                "Run {}: unexpected phase change {} → {}",
                self.run_id,
                self.phase.as_str(),
                phase.as_str()
            );
        }
        self.state = RunState::Running;
        self.phase = phase;
        self.current_step = step.to_string();
        self.last_updated = Some(now);
        if let Some(progress) = progress {
            self.progress = progress.min(100);
        }
        if let Some(record) = self.phases.get_mut(phase.as_str()) {
            if record.state == PhaseState::Pending {
                record.state = PhaseState::InProgress;
                record.started_at = Some(now);
            }
        }
    }

    fn complete_phase(&mut self, phase: ImportPhase) {
        let now = Utc::now();
        if let Some(record) = self.phases.get_mut(phase.as_str()) {
            record.state = PhaseState::Completed;
            record.duration_secs = record
                .started_at
                .map(|start| (now - start).num_milliseconds() as f64 / 1000.0);
        }
        self.last_updated = Some(now);
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.ended_at = Some(now);
        self.total_duration_secs = Some((now - self.started_at).num_milliseconds() as f64 / 1000.0);
    }

    fn complete(&mut self, stats: serde_json::Value) {
        self.state = RunState::Completed;
        self.phase = ImportPhase::Completed;
        self.progress = 100;
        self.current_step = "Import completed successfully".to_string();
        self.stats = Some(stats);
        self.finish();
    }

    fn fail(&mut self, error: &ImportError) {
        self.state = RunState::Failed;
        self.phase = ImportPhase::Failed;
        self.current_step = format!("Import failed: {}", error);
        self.error = Some(error.to_string());
        self.failure_kind = Some(error.failure_kind());
        self.finish();
    }
}

/// Rough duration by size and format: ODS is the slow case, Excel formats
/// take about 60% of that, CSV is cheap. Never below 3 minutes.
pub fn estimate_duration_minutes(file_size_mb: f64, format: Option<SourceFormat>) -> u32 {
    let multiplier = match format {
        Some(SourceFormat::Ods) | None => 1.0,
        Some(SourceFormat::Csv) => 0.3,
        Some(_) => 0.6,
    };
    let base: f64 = if file_size_mb > 25.0 {
        40.0
    } else if file_size_mb > 15.0 {
        20.0
    } else if file_size_mb > 5.0 {
        10.0
    } else {
        5.0
    };
    ((base * multiplier) as u32).max(3)
}

// ============================================================================
// STATUS STORE
// ============================================================================

/// Persistence for status records, injected into the orchestrator.
///
/// Implementors provide `load`/`save`; the lifecycle operations are built on
/// top of them.
pub trait StatusStore: Send + Sync {
    fn load(&self, run_id: &str) -> Result<Option<StatusRecord>>;
    fn save(&self, record: &StatusRecord) -> Result<()>;

    /// New run; returns its id
    fn start(&self, file_name: &str, file_size_mb: f64) -> Result<String> {
        let record = StatusRecord::new(file_name, file_size_mb);
        self.save(&record)?;
        Ok(record.run_id)
    }

    fn update_phase(
        &self,
        run_id: &str,
        phase: ImportPhase,
        step: &str,
        progress: Option<u8>,
    ) -> Result<()> {
        modify(self, run_id, |r| r.update_phase(phase, step, progress))
    }

    fn complete_phase(&self, run_id: &str, phase: ImportPhase) -> Result<()> {
        modify(self, run_id, |r| r.complete_phase(phase))
    }

    fn complete(&self, run_id: &str, stats: serde_json::Value) -> Result<()> {
        modify(self, run_id, |r| r.complete(stats))
    }

    fn fail(&self, run_id: &str, error: &ImportError) -> Result<()> {
        modify(self, run_id, |r| r.fail(error))
    }

    fn get(&self, run_id: &str) -> Result<Option<StatusRecord>> {
        self.load(run_id)
    }
}

/// Load, change, save. Unknown run ids are ignored.
fn modify<S>(store: &S, run_id: &str, change: impl FnOnce(&mut StatusRecord)) -> Result<()>
where
    S: StatusStore + ?Sized,
{
    match store.load(run_id)? {
        Some(mut record) => {
            change(&mut record);
            store.save(&record)
        }
        None => {
            debug!("Status update for unknown run {}", run_id);
            Ok(())
        }
    }
}

/// One pretty-printed JSON file per run: `<dir>/import_status_<run_id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStatusStore {
    dir: PathBuf,
}

impl JsonFileStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(JsonFileStatusStore { dir })
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("import_status_{}.json", run_id))
    }
}

impl StatusStore for JsonFileStatusStore {
    fn load(&self, run_id: &str) -> Result<Option<StatusRecord>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, record: &StatusRecord) -> Result<()> {
        // Write then rename so a poller never sees half a file
        let path = self.path_for(&record.run_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(record)?)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, StatusRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn load(&self, run_id: &str) -> Result<Option<StatusRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| ImportError::Status("store lock poisoned".to_string()))?;
        Ok(records.get(run_id).cloned())
    }

    fn save(&self, record: &StatusRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ImportError::Status("store lock poisoned".to_string()))?;
        records.insert(record.run_id.clone(), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_estimates() {
        assert_eq!(estimate_duration_minutes(30.0, Some(SourceFormat::Ods)), 40);
        assert_eq!(estimate_duration_minutes(30.0, Some(SourceFormat::Xlsx)), 24);
        assert_eq!(estimate_duration_minutes(1.0, Some(SourceFormat::Xlsx)), 3);
        assert_eq!(estimate_duration_minutes(10.0, None), 10);
    }

    #[test]
    fn test_state_machine_edges() {
        assert!(ImportPhase::Idle.can_advance_to(ImportPhase::StagingConversion));
        assert!(ImportPhase::StagingConversion.can_advance_to(ImportPhase::Failed));
        assert!(ImportPhase::RelationshipReconciliation.can_advance_to(ImportPhase::Completed));
        assert!(!ImportPhase::RowProcessing.can_advance_to(ImportPhase::Failed));
        assert!(!ImportPhase::Completed.can_advance_to(ImportPhase::RowProcessing));
    }

    #[test]
    fn test_json_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStatusStore::new(dir.path()).unwrap();

        let run_id = store.start("08_2025.ods", 12.5).unwrap();
        let record = store.get(&run_id).unwrap().unwrap();
        assert_eq!(record.file_type, "ODS");
        assert_eq!(record.state, RunState::Starting);
        assert_eq!(record.estimated_duration_minutes, 10);

        store
            .update_phase(&run_id, ImportPhase::RowProcessing, "Processing rows", Some(40))
            .unwrap();
        store.complete_phase(&run_id, ImportPhase::RowProcessing).unwrap();
        store
            .complete(&run_id, serde_json::json!({"locations_created": 3}))
            .unwrap();

        let record = store.get(&run_id).unwrap().unwrap();
        assert_eq!(record.state, RunState::Completed);
        assert_eq!(record.progress, 100);
        let phase = &record.phases["row_processing"];
        assert_eq!(phase.state, PhaseState::Completed);
        assert!(phase.duration_secs.is_some());
        assert_eq!(record.phases["staging_conversion"].state, PhaseState::Pending);
        assert_eq!(record.stats.unwrap()["locations_created"], 3);
    }

    #[test]
    fn test_failure_records_kind() {
        let store = MemoryStatusStore::new();
        let run_id = store.start("08_2025.xlsx", 3.0).unwrap();
        let err = ImportError::StagingTimeout {
            path: PathBuf::from("08_2025.xlsx"),
            seconds: 600,
        };
        store.fail(&run_id, &err).unwrap();

        let record = store.get(&run_id).unwrap().unwrap();
        assert_eq!(record.state, RunState::Failed);
        assert_eq!(record.failure_kind, Some(FailureKind::Timeout));
        assert!(record.error.unwrap().contains("timed out"));
        assert!(store.get("no-such-run").unwrap().is_none());
    }
}
