//! Store contract and implementations.
//!
//! The engine consumes persistence through the [`StateStore`] trait: typed
//! load/save for singular documents (config, engine state, budget state),
//! whole-collection load/save for objectives, tasks, and cycles, and
//! append/list for the append-only sets (scans, plans, runs, evaluations,
//! decisions, experiments).
//!
//! Two implementations:
//! - [`JsonStore`] — one JSON document per collection under a state
//!   directory, written atomically (temp file + rename) so a reader never
//!   observes a partial file; append-only sets are JSON-lines files.
//! - [`MemoryStore`] — in-memory, for tests.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};

use crate::config::EngineConfig;
use crate::model::{
    BudgetState, Cycle, DecisionLogEntry, EngineState, Evaluation, ExperimentLogEntry, Objective,
    Plan, Run, Scan, Task,
};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a store.
pub type SharedStore = Arc<dyn StateStore>;

/// Typed persistence consumed by the engine.
///
/// Save operations must be atomic: a concurrent reader sees either the old
/// document or the new one, never a partial write.
pub trait StateStore: Send + Sync {
    fn load_config(&self) -> StoreResult<Option<EngineConfig>>;
    fn save_config(&self, config: &EngineConfig) -> StoreResult<()>;

    fn load_engine_state(&self) -> StoreResult<Option<EngineState>>;
    fn save_engine_state(&self, state: &EngineState) -> StoreResult<()>;

    fn load_budget_state(&self) -> StoreResult<Option<BudgetState>>;
    fn save_budget_state(&self, state: &BudgetState) -> StoreResult<()>;

    fn load_objectives(&self) -> StoreResult<Vec<Objective>>;
    fn save_objectives(&self, objectives: &[Objective]) -> StoreResult<()>;

    fn load_tasks(&self) -> StoreResult<Vec<Task>>;
    fn save_tasks(&self, tasks: &[Task]) -> StoreResult<()>;

    fn load_cycles(&self) -> StoreResult<Vec<Cycle>>;
    fn save_cycles(&self, cycles: &[Cycle]) -> StoreResult<()>;

    fn append_scan(&self, scan: &Scan) -> StoreResult<()>;
    fn list_scans(&self) -> StoreResult<Vec<Scan>>;

    fn append_plan(&self, plan: &Plan) -> StoreResult<()>;
    fn list_plans(&self) -> StoreResult<Vec<Plan>>;

    fn append_run(&self, run: &Run) -> StoreResult<()>;
    fn list_runs(&self) -> StoreResult<Vec<Run>>;

    fn append_evaluation(&self, evaluation: &Evaluation) -> StoreResult<()>;
    fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>>;

    fn append_decision(&self, entry: &DecisionLogEntry) -> StoreResult<()>;
    fn list_decisions(&self) -> StoreResult<Vec<DecisionLogEntry>>;

    fn append_experiment(&self, entry: &ExperimentLogEntry) -> StoreResult<()>;
    fn list_experiments(&self) -> StoreResult<Vec<ExperimentLogEntry>>;

    // ------------------------------------------------------------------
    // Provided conveniences composed from the required operations.
    // ------------------------------------------------------------------

    /// Fetch a single task by id.
    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        Ok(self.load_tasks()?.into_iter().find(|t| t.id == task_id))
    }

    /// Insert or replace a task by id.
    fn upsert_task(&self, task: &Task) -> StoreResult<()> {
        let mut tasks = self.load_tasks()?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task.clone(),
            None => tasks.push(task.clone()),
        }
        self.save_tasks(&tasks)
    }

    /// Fetch a single objective by id.
    fn get_objective(&self, objective_id: &str) -> StoreResult<Option<Objective>> {
        Ok(self
            .load_objectives()?
            .into_iter()
            .find(|o| o.id == objective_id))
    }

    /// Insert or replace an objective by id.
    fn upsert_objective(&self, objective: &Objective) -> StoreResult<()> {
        let mut objectives = self.load_objectives()?;
        match objectives.iter_mut().find(|o| o.id == objective.id) {
            Some(slot) => *slot = objective.clone(),
            None => objectives.push(objective.clone()),
        }
        self.save_objectives(&objectives)
    }

    /// Insert or replace a cycle by id.
    fn upsert_cycle(&self, cycle: &Cycle) -> StoreResult<()> {
        let mut cycles = self.load_cycles()?;
        match cycles.iter_mut().find(|c| c.id == cycle.id) {
            Some(slot) => *slot = cycle.clone(),
            None => cycles.push(cycle.clone()),
        }
        self.save_cycles(&cycles)
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// File-backed store: one document per collection under a state directory.
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    /// Open (creating the directory if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Read a whole-document JSON file; absent file means absent document.
    fn read_doc<T: DeserializeOwned>(&self, name: &str) -> StoreResult<Option<T>> {
        let path = self.path(name);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically write a whole-document JSON file (temp file + rename).
    fn write_doc<T: Serialize>(&self, name: &str, value: &T) -> StoreResult<()> {
        let path = self.path(name);
        let mut buf = serde_json::to_string_pretty(value)?;
        buf.push('\n');
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append one record to a JSON-lines file. A record is written with a
    /// single `write_all`, so a line is either fully present or absent.
    fn append_line<T: Serialize>(&self, name: &str, value: &T) -> StoreResult<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read every record of a JSON-lines file; absent file means empty set.
    fn read_lines<T: DeserializeOwned>(&self, name: &str) -> StoreResult<Vec<T>> {
        let path = self.path(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }

    fn read_collection<T: DeserializeOwned>(&self, name: &str) -> StoreResult<Vec<T>> {
        Ok(self.read_doc(name)?.unwrap_or_default())
    }
}

impl StateStore for JsonStore {
    fn load_config(&self) -> StoreResult<Option<EngineConfig>> {
        self.read_doc("config.json")
    }

    fn save_config(&self, config: &EngineConfig) -> StoreResult<()> {
        self.write_doc("config.json", config)
    }

    fn load_engine_state(&self) -> StoreResult<Option<EngineState>> {
        self.read_doc("engine_state.json")
    }

    fn save_engine_state(&self, state: &EngineState) -> StoreResult<()> {
        self.write_doc("engine_state.json", state)
    }

    fn load_budget_state(&self) -> StoreResult<Option<BudgetState>> {
        self.read_doc("budget_state.json")
    }

    fn save_budget_state(&self, state: &BudgetState) -> StoreResult<()> {
        self.write_doc("budget_state.json", state)
    }

    fn load_objectives(&self) -> StoreResult<Vec<Objective>> {
        self.read_collection("objectives.json")
    }

    fn save_objectives(&self, objectives: &[Objective]) -> StoreResult<()> {
        self.write_doc("objectives.json", &objectives)
    }

    fn load_tasks(&self) -> StoreResult<Vec<Task>> {
        self.read_collection("tasks.json")
    }

    fn save_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        self.write_doc("tasks.json", &tasks)
    }

    fn load_cycles(&self) -> StoreResult<Vec<Cycle>> {
        self.read_collection("cycles.json")
    }

    fn save_cycles(&self, cycles: &[Cycle]) -> StoreResult<()> {
        self.write_doc("cycles.json", &cycles)
    }

    fn append_scan(&self, scan: &Scan) -> StoreResult<()> {
        self.append_line("scans.jsonl", scan)
    }

    fn list_scans(&self) -> StoreResult<Vec<Scan>> {
        self.read_lines("scans.jsonl")
    }

    fn append_plan(&self, plan: &Plan) -> StoreResult<()> {
        self.append_line("plans.jsonl", plan)
    }

    fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        self.read_lines("plans.jsonl")
    }

    fn append_run(&self, run: &Run) -> StoreResult<()> {
        self.append_line("runs.jsonl", run)
    }

    fn list_runs(&self) -> StoreResult<Vec<Run>> {
        self.read_lines("runs.jsonl")
    }

    fn append_evaluation(&self, evaluation: &Evaluation) -> StoreResult<()> {
        self.append_line("evaluations.jsonl", evaluation)
    }

    fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        self.read_lines("evaluations.jsonl")
    }

    fn append_decision(&self, entry: &DecisionLogEntry) -> StoreResult<()> {
        self.append_line("decisions.jsonl", entry)
    }

    fn list_decisions(&self) -> StoreResult<Vec<DecisionLogEntry>> {
        self.read_lines("decisions.jsonl")
    }

    fn append_experiment(&self, entry: &ExperimentLogEntry) -> StoreResult<()> {
        self.append_line("experiments.jsonl", entry)
    }

    fn list_experiments(&self) -> StoreResult<Vec<ExperimentLogEntry>> {
        self.read_lines("experiments.jsonl")
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    config: Option<EngineConfig>,
    engine_state: Option<EngineState>,
    budget_state: Option<BudgetState>,
    objectives: Vec<Objective>,
    tasks: Vec<Task>,
    cycles: Vec<Cycle>,
    scans: Vec<Scan>,
    plans: Vec<Plan>,
    runs: Vec<Run>,
    evaluations: Vec<Evaluation>,
    decisions: Vec<DecisionLogEntry>,
    experiments: Vec<ExperimentLogEntry>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn load_config(&self) -> StoreResult<Option<EngineConfig>> {
        Ok(self.read().config.clone())
    }

    fn save_config(&self, config: &EngineConfig) -> StoreResult<()> {
        self.write().config = Some(config.clone());
        Ok(())
    }

    fn load_engine_state(&self) -> StoreResult<Option<EngineState>> {
        Ok(self.read().engine_state.clone())
    }

    fn save_engine_state(&self, state: &EngineState) -> StoreResult<()> {
        self.write().engine_state = Some(state.clone());
        Ok(())
    }

    fn load_budget_state(&self) -> StoreResult<Option<BudgetState>> {
        Ok(self.read().budget_state.clone())
    }

    fn save_budget_state(&self, state: &BudgetState) -> StoreResult<()> {
        self.write().budget_state = Some(state.clone());
        Ok(())
    }

    fn load_objectives(&self) -> StoreResult<Vec<Objective>> {
        Ok(self.read().objectives.clone())
    }

    fn save_objectives(&self, objectives: &[Objective]) -> StoreResult<()> {
        self.write().objectives = objectives.to_vec();
        Ok(())
    }

    fn load_tasks(&self) -> StoreResult<Vec<Task>> {
        Ok(self.read().tasks.clone())
    }

    fn save_tasks(&self, tasks: &[Task]) -> StoreResult<()> {
        self.write().tasks = tasks.to_vec();
        Ok(())
    }

    fn load_cycles(&self) -> StoreResult<Vec<Cycle>> {
        Ok(self.read().cycles.clone())
    }

    fn save_cycles(&self, cycles: &[Cycle]) -> StoreResult<()> {
        self.write().cycles = cycles.to_vec();
        Ok(())
    }

    fn append_scan(&self, scan: &Scan) -> StoreResult<()> {
        self.write().scans.push(scan.clone());
        Ok(())
    }

    fn list_scans(&self) -> StoreResult<Vec<Scan>> {
        Ok(self.read().scans.clone())
    }

    fn append_plan(&self, plan: &Plan) -> StoreResult<()> {
        self.write().plans.push(plan.clone());
        Ok(())
    }

    fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        Ok(self.read().plans.clone())
    }

    fn append_run(&self, run: &Run) -> StoreResult<()> {
        self.write().runs.push(run.clone());
        Ok(())
    }

    fn list_runs(&self) -> StoreResult<Vec<Run>> {
        Ok(self.read().runs.clone())
    }

    fn append_evaluation(&self, evaluation: &Evaluation) -> StoreResult<()> {
        self.write().evaluations.push(evaluation.clone());
        Ok(())
    }

    fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        Ok(self.read().evaluations.clone())
    }

    fn append_decision(&self, entry: &DecisionLogEntry) -> StoreResult<()> {
        self.write().decisions.push(entry.clone());
        Ok(())
    }

    fn list_decisions(&self) -> StoreResult<Vec<DecisionLogEntry>> {
        Ok(self.read().decisions.clone())
    }

    fn append_experiment(&self, entry: &ExperimentLogEntry) -> StoreResult<()> {
        self.write().experiments.push(entry.clone());
        Ok(())
    }

    fn list_experiments(&self) -> StoreResult<Vec<ExperimentLogEntry>> {
        Ok(self.read().experiments.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineMode;
    use crate::model::{Cycle, Objective};
    use crate::state_machine::Phase;
    use crate::tier::AutonomyTier;

    fn json_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::open(dir.path().join("state")).expect("open store");
        (dir, store)
    }

    #[test]
    fn absent_documents_load_as_none_or_empty() {
        let (_dir, store) = json_store();
        assert!(store.load_engine_state().unwrap().is_none());
        assert!(store.load_config().unwrap().is_none());
        assert!(store.load_objectives().unwrap().is_empty());
        assert!(store.list_runs().unwrap().is_empty());
    }

    #[test]
    fn engine_state_roundtrip() {
        let (_dir, store) = json_store();
        let state = EngineState {
            total_cycles_completed: 7,
            ..Default::default()
        };
        store.save_engine_state(&state).unwrap();
        let loaded = store.load_engine_state().unwrap().unwrap();
        assert_eq!(loaded.total_cycles_completed, 7);
    }

    #[test]
    fn objectives_collection_roundtrip() {
        let (_dir, store) = json_store();
        let obj = Objective::new("Test", "first objective");
        store.save_objectives(std::slice::from_ref(&obj)).unwrap();
        let loaded = store.load_objectives().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Test");
    }

    #[test]
    fn append_only_sets_accumulate_in_order() {
        let (_dir, store) = json_store();
        for number in 1..=3u64 {
            let cycle = Cycle::new(number, EngineMode::Simulation);
            let mut run = Run::new(cycle.id.clone(), Phase::Scan, "mock");
            run.model = format!("model-{number}");
            store.append_run(&run).unwrap();
        }
        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].model, "model-1");
        assert_eq!(runs[2].model, "model-3");
    }

    #[test]
    fn upsert_task_inserts_then_replaces() {
        let (_dir, store) = json_store();
        let mut task = Task::new("o1", "c1", "title", "desc", AutonomyTier::T0, 5.0);
        store.upsert_task(&task).unwrap();
        task.state = crate::model::TaskState::Reviewing;
        store.upsert_task(&task).unwrap();

        let tasks = store.load_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, crate::model::TaskState::Reviewing);
        assert_eq!(
            store.get_task(&task.id).unwrap().map(|t| t.state),
            Some(crate::model::TaskState::Reviewing)
        );
    }

    #[test]
    fn no_temp_files_survive_a_save() {
        let (_dir, store) = json_store();
        store.save_config(&EngineConfig::default()).unwrap();
        store.save_config(&EngineConfig::default()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn memory_store_mirrors_json_store_behavior() {
        let store = MemoryStore::new();
        assert!(store.load_budget_state().unwrap().is_none());
        store.save_budget_state(&BudgetState::default()).unwrap();
        assert!(store.load_budget_state().unwrap().is_some());

        let obj = Objective::new("A", "");
        store.upsert_objective(&obj).unwrap();
        assert_eq!(store.get_objective(&obj.id).unwrap().unwrap().title, "A");
    }
}
