//! Calculation: one compute job and the results it produced.
//!
//! # Responsibility
//! - Persist the job order, model, inputs, status and scheduling priority.
//! - Collect produced structure, property and elementary-step ids.
//!
//! # Invariants
//! - Priority stays within `[1, 100]`; job resource hints are finite,
//!   non-negative and request at least one core. Both are checked before
//!   the store is touched.
//! - Result lists keep insertion order and are never deduplicated
//!   implicitly.

use crate::entity::field::{list_fields, map_fields, scalar_fields, Field};
use crate::entity::object::{access, base_document, create, entity_kind, write};
use crate::error::{EntityError, EntityResult};
use crate::model::descriptor::ModelDescriptor;
use crate::model::id::Identifier;
use crate::model::layout::{CalculationStatus, EntityKind};
use crate::repo::CollectionHandle;
use crate::store::Update;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::ops::{Add, AddAssign};

pub const DEFAULT_PRIORITY: u32 = 10;
pub const MIN_PRIORITY: u32 = 1;
pub const MAX_PRIORITY: u32 = 100;

const JOB: &str = "job";
const PRIORITY: &str = "priority";
const RESULTS: &str = "results";
const JOB_TOLERANCE: f64 = 1e-12;

/// Job order plus resource hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub order: String,
    /// Gigabytes.
    pub memory: f64,
    pub cores: u32,
    /// Gigabytes.
    pub disk: f64,
}

impl Job {
    pub fn new(order: impl Into<String>) -> Self {
        Self {
            order: order.into(),
            memory: 1.0,
            cores: 1,
            disk: 1.0,
        }
    }

    pub fn with_resources(mut self, memory: f64, cores: u32, disk: f64) -> Self {
        self.memory = memory;
        self.cores = cores;
        self.disk = disk;
        self
    }

    /// Field name and message of the first invalid hint.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if self.order.trim().is_empty() {
            return Err(("job.order", "order must not be empty".to_string()));
        }
        if !self.memory.is_finite() || self.memory < 0.0 {
            return Err(("job.memory", format!("invalid memory {}", self.memory)));
        }
        if !self.disk.is_finite() || self.disk < 0.0 {
            return Err(("job.disk", format!("invalid disk {}", self.disk)));
        }
        if self.cores == 0 {
            return Err(("job.cores", "at least one core is required".to_string()));
        }
        Ok(())
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
            && self.cores == other.cores
            && (self.memory - other.memory).abs() < JOB_TOLERANCE
            && (self.disk - other.disk).abs() < JOB_TOLERANCE
    }
}

/// Ids produced by a calculation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Results {
    #[serde(default)]
    pub structures: Vec<Identifier>,
    #[serde(default)]
    pub properties: Vec<Identifier>,
    #[serde(default)]
    pub elementary_steps: Vec<Identifier>,
}

impl Results {
    pub fn is_empty(&self) -> bool {
        self.structures.is_empty() && self.properties.is_empty() && self.elementary_steps.is_empty()
    }

    /// Keeps the first occurrence of every id, per list.
    pub fn remove_duplicates(&mut self) {
        fn first_only(ids: &mut Vec<Identifier>) {
            let mut seen = HashSet::new();
            ids.retain(|id| seen.insert(*id));
        }
        first_only(&mut self.structures);
        first_only(&mut self.properties);
        first_only(&mut self.elementary_steps);
    }
}

impl AddAssign for Results {
    fn add_assign(&mut self, rhs: Self) {
        self.structures.extend(rhs.structures);
        self.properties.extend(rhs.properties);
        self.elementary_steps.extend(rhs.elementary_steps);
    }
}

impl Add for Results {
    type Output = Results;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

entity_kind! {
    /// Handle to a document in the calculations collection.
    Calculation => EntityKind::Calculation
}

scalar_fields!(Calculation {
    "model": ModelDescriptor => has_model, get_model, set_model, clear_model;
    "status": CalculationStatus => has_status, get_status, set_status, clear_status;
    "raw_output": String => has_raw_output, get_raw_output, set_raw_output, clear_raw_output;
    "executor": String => has_executor, get_executor, set_executor, clear_executor;
    /// Wall time in seconds.
    "runtime": f64 => has_runtime, get_runtime, set_runtime, clear_runtime;
    "comment": String => has_comment, get_comment, set_comment, clear_comment;
});

list_fields!(Calculation {
    "structures": Identifier => has_structures, get_structures, set_structures, add_structure,
        remove_structure, has_structure, clear_structures;
});

map_fields!(Calculation {
    "auxiliaries": Identifier => has_auxiliaries, has_auxiliary, get_auxiliary, set_auxiliary,
        remove_auxiliary, get_auxiliaries, set_auxiliaries, clear_auxiliaries;
    "restart_information": Identifier => has_restart_information, has_restart_info,
        get_restart_info, set_restart_info, remove_restart_info, get_restart_information,
        set_restart_information, clear_restart_information;
    "settings": Value => has_settings, has_setting, get_setting, set_setting, remove_setting,
        get_settings, set_settings, clear_settings;
});

fn check_priority(priority: u32) -> EntityResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(EntityError::validation(
            EntityKind::Calculation,
            PRIORITY,
            format!("{priority} is outside [{MIN_PRIORITY}, {MAX_PRIORITY}]"),
        ));
    }
    Ok(())
}

fn check_job(job: &Job) -> EntityResult<()> {
    job.validate()
        .map_err(|(field, message)| EntityError::validation(EntityKind::Calculation, field, message))
}

fn to_value<T: Serialize>(field: &str, value: &T) -> EntityResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| EntityError::invalid_data(EntityKind::Calculation, field, None, err))
}

impl Calculation {
    /// Creates the document in status `construction` with default priority.
    pub fn create(
        &mut self,
        model: &ModelDescriptor,
        job: &Job,
        structures: &[Identifier],
    ) -> EntityResult<Identifier> {
        check_job(job)?;
        let mut document = base_document(EntityKind::Calculation);
        document.insert(JOB.to_string(), to_value(JOB, job)?);
        document.insert("model".to_string(), to_value("model", model)?);
        document.insert(
            "structures".to_string(),
            Value::from(structures.iter().copied().map(Value::from).collect::<Vec<_>>()),
        );
        document.insert("auxiliaries".to_string(), Value::Object(Map::new()));
        document.insert("restart_information".to_string(), Value::Object(Map::new()));
        document.insert("settings".to_string(), Value::Object(Map::new()));
        document.insert("status".to_string(), Value::from(CalculationStatus::Construction));
        document.insert(PRIORITY.to_string(), Value::from(DEFAULT_PRIORITY));
        document.insert(RESULTS.to_string(), to_value(RESULTS, &Results::default())?);
        create(self, document)
    }

    pub fn make(
        model: &ModelDescriptor,
        job: &Job,
        structures: &[Identifier],
        collection: CollectionHandle,
    ) -> EntityResult<Self> {
        let mut calculation = Self::in_collection(collection);
        calculation.create(model, job, structures)?;
        Ok(calculation)
    }

    // `job` and `priority` have no `clear_`; both are required from creation on.
    pub fn has_job(&self) -> EntityResult<bool> {
        Field::<Job>::new(JOB).has(self)
    }

    pub fn get_job(&self) -> EntityResult<Job> {
        Field::<Job>::new(JOB).get(self)
    }

    /// # Errors
    /// - `Validation` for an empty order or out-of-domain resource hints.
    pub fn set_job(&self, job: &Job) -> EntityResult<()> {
        access(self)?;
        check_job(job)?;
        Field::<Job>::new(JOB).set(self, job)
    }

    pub fn has_priority(&self) -> EntityResult<bool> {
        Field::<u32>::new(PRIORITY).has(self)
    }

    pub fn get_priority(&self) -> EntityResult<u32> {
        Field::<u32>::new(PRIORITY).get(self)
    }

    /// # Errors
    /// - `Validation` outside `[1, 100]`.
    pub fn set_priority(&self, priority: u32) -> EntityResult<()> {
        access(self)?;
        check_priority(priority)?;
        Field::<u32>::new(PRIORITY).set(self, &priority)
    }

    pub fn has_results(&self) -> EntityResult<bool> {
        Ok(!self.get_results()?.is_empty())
    }

    /// Stored results; an unset aggregate reads as empty.
    pub fn get_results(&self) -> EntityResult<Results> {
        Ok(Field::<Results>::new(RESULTS).get_opt(self)?.unwrap_or_default())
    }

    pub fn set_results(&self, results: &Results) -> EntityResult<()> {
        Field::<Results>::new(RESULTS).set(self, results)
    }

    /// Appends `results` to the stored lists in one update.
    pub fn append_results(&self, results: &Results) -> EntityResult<()> {
        let update = Update::new()
            .push_all("results.structures", results.structures.iter().copied())
            .push_all("results.properties", results.properties.iter().copied())
            .push_all("results.elementary_steps", results.elementary_steps.iter().copied());
        write(self, &update)
    }

    pub fn clear_results(&self) -> EntityResult<()> {
        self.set_results(&Results::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{Calculation, Job, Results};
    use crate::entity::Entity;
    use crate::error::EntityError;
    use crate::model::descriptor::ModelDescriptor;
    use crate::model::id::Identifier;
    use crate::model::layout::CalculationStatus;
    use crate::repo::{Collection, CollectionHandle};
    use crate::store::{SqliteStore, Store};
    use serde_json::json;
    use std::sync::Arc;

    fn calculations() -> CollectionHandle {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection("calculations").unwrap();
        Collection::new("calculations", Arc::new(store), 10)
    }

    fn calculation() -> Calculation {
        Calculation::make(
            &ModelDescriptor::new("dft", "pbe", "def2-svp"),
            &Job::new("scine_geometry_optimization"),
            &[Identifier::generate()],
            calculations(),
        )
        .unwrap()
    }

    #[test]
    fn job_equality_tolerates_rounding() {
        let a = Job::new("sp").with_resources(2.0, 4, 10.0);
        let b = Job::new("sp").with_resources(2.0 + 1e-14, 4, 10.0);
        assert_eq!(a, b);
        assert_ne!(a, Job::new("sp").with_resources(2.5, 4, 10.0));
    }

    #[test]
    fn invalid_jobs_fail_before_the_store() {
        let mut calc = Calculation::in_collection(calculations());
        let job = Job::new("sp").with_resources(-1.0, 1, 1.0);
        let err = calc
            .create(&ModelDescriptor::wildcard(), &job, &[])
            .unwrap_err();
        assert!(matches!(err, EntityError::Validation { field, .. } if field == "job.memory"));
        assert!(!calc.has_id());

        let calc = calculation();
        let err = calc.set_job(&Job::new("sp").with_resources(1.0, 0, 1.0)).unwrap_err();
        assert!(matches!(err, EntityError::Validation { field, .. } if field == "job.cores"));
    }

    #[test]
    fn settings_are_individually_addressable() {
        let calc = calculation();
        calc.set_setting("max_scf_iterations", 200).unwrap();
        calc.set_setting("self_consistence_criterion", 1e-7).unwrap();
        assert_eq!(calc.get_setting("max_scf_iterations").unwrap(), json!(200));
        assert_eq!(calc.has_settings().unwrap(), 2);
        calc.remove_setting("max_scf_iterations").unwrap();
        assert!(!calc.has_setting("max_scf_iterations").unwrap());
        assert!(matches!(
            calc.get_setting("max_scf_iterations").unwrap_err(),
            EntityError::FieldNotSet { .. }
        ));
    }

    #[test]
    fn append_results_keeps_existing_entries() {
        let calc = calculation();
        let first = Results {
            structures: vec![Identifier::generate()],
            ..Results::default()
        };
        let second = Results {
            structures: vec![Identifier::generate()],
            properties: vec![Identifier::generate()],
            elementary_steps: Vec::new(),
        };
        calc.set_results(&first).unwrap();
        calc.append_results(&second).unwrap();
        assert_eq!(calc.get_results().unwrap(), first + second);
        calc.clear_results().unwrap();
        assert!(!calc.has_results().unwrap());
    }

    #[test]
    fn remove_duplicates_keeps_first_occurrence() {
        let (x, y) = (Identifier::generate(), Identifier::generate());
        let mut results = Results {
            structures: vec![x, y, x],
            properties: vec![y, y],
            elementary_steps: vec![],
        };
        results.remove_duplicates();
        assert_eq!(results.structures, vec![x, y]);
        assert_eq!(results.properties, vec![y]);
    }

    #[test]
    fn job_and_priority_report_presence() {
        let calc = calculation();
        assert!(calc.has_job().unwrap());
        assert!(calc.has_priority().unwrap());

        let collection = calculations();
        let bare = collection
            .insert(json!({ "_objecttype": "calculation" }).as_object().cloned().unwrap())
            .unwrap();
        let bare = Calculation::linked(bare, collection);
        assert!(!bare.has_job().unwrap());
        assert!(!bare.has_priority().unwrap());
        assert!(matches!(
            bare.get_priority().unwrap_err(),
            EntityError::FieldNotSet { .. }
        ));
    }

    #[test]
    fn status_and_optional_scalars() {
        let calc = calculation();
        assert_eq!(calc.get_status().unwrap(), CalculationStatus::Construction);
        calc.set_status(CalculationStatus::New).unwrap();
        assert_eq!(calc.get_status().unwrap(), CalculationStatus::New);
        assert!(!calc.has_runtime().unwrap());
        calc.set_runtime(0.0).unwrap();
        assert!(calc.has_runtime().unwrap());
        assert_eq!(calc.get_runtime().unwrap(), 0.0);
        calc.set_raw_output("").unwrap();
        assert_eq!(calc.get_raw_output().unwrap(), "");
    }
}
