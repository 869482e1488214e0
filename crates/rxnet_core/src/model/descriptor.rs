//! Computational model descriptor with wildcard matching.
//!
//! # Responsibility
//! - Describe the method/configuration that produced a result.
//! - Compare descriptors with symmetric wildcard semantics.
//! - Complete a descriptor against a calculation settings object and back.
//! - Build the store filter that preselects documents for a target model.
//!
//! # Invariants
//! - `"any"` (ASCII case-insensitive) in either operand matches every value.
//! - `"none"` and the empty string are the same sentinel; it matches only
//!   itself or `"any"`.
//! - String comparison folds ASCII case only, like the store's `lower()`.
//! - Numeric fields compare with an absolute tolerance of `1e-12`.
//! - `matches` is symmetric but not transitive, so there is deliberately no
//!   `PartialEq`, `Eq` or `Hash` implementation.

use crate::store::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Calculation settings: a keyed mapping of primitive or nested values.
pub type Settings = Map<String, Value>;

const ANY: &str = "any";
const NONE: &str = "none";
const NUMERIC_TOLERANCE: f64 = 1e-12;
const DEFAULT_TEMPERATURE_KELVIN: f64 = 298.15;
const DEFAULT_PRESSURE_PASCAL: f64 = 101_325.0;

// Fields handled outside the generic completion loop.
const COMPLETION_SKIPPED: [&str; 3] = ["method_family", "program", "version"];

/// A numeric model field that may also hold one of the two sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ModelNumber {
    Any,
    None,
    Value(f64),
}

impl ModelNumber {
    fn matches(self, other: ModelNumber) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::None, Self::None) => true,
            (Self::Value(left), Self::Value(right)) => (left - right).abs() <= NUMERIC_TOLERANCE,
            _ => false,
        }
    }
}

impl Display for ModelNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str(ANY),
            Self::None => f.write_str(NONE),
            Self::Value(value) => write!(f, "{value}"),
        }
    }
}

impl TryFrom<Value> for ModelNumber {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(number) => number
                .as_f64()
                .map(Self::Value)
                .ok_or_else(|| format!("model number `{number}` is not representable")),
            Value::String(text) => {
                if is_any(&text) {
                    Ok(Self::Any)
                } else if is_none(&text) {
                    Ok(Self::None)
                } else {
                    text.parse::<f64>()
                        .map(Self::Value)
                        .map_err(|_| format!("model number `{text}` is neither numeric nor a sentinel"))
                }
            }
            Value::Null => Ok(Self::None),
            other => Err(format!("model number must be a number or string, got {other}")),
        }
    }
}

impl From<ModelNumber> for Value {
    fn from(value: ModelNumber) -> Self {
        match value {
            ModelNumber::Any => Value::String(ANY.to_string()),
            ModelNumber::None => Value::String(NONE.to_string()),
            ModelNumber::Value(number) => serde_json::Number::from_f64(number)
                .map_or_else(|| Value::String(NONE.to_string()), Value::Number),
        }
    }
}

/// Completion of a descriptor against settings failed on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConflict {
    pub field: &'static str,
    pub model_value: String,
    /// `None` when the settings lack the key entirely.
    pub setting_value: Option<String>,
}

impl Display for ModelConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.setting_value {
            Some(setting) => write!(
                f,
                "model field `{}` is `{}` but the settings hold `{}`",
                self.field, self.model_value, setting
            ),
            None => write!(
                f,
                "model field `{}` is `{}` but the settings lack it",
                self.field, self.model_value
            ),
        }
    }
}

impl Error for ModelConflict {}

/// Description of a computational method and its environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub method_family: String,
    pub method: String,
    pub basis_set: String,
    pub spin_mode: String,
    pub program: String,
    pub version: String,
    pub solvation: String,
    pub solvent: String,
    pub embedding: String,
    pub periodic_boundaries: String,
    pub external_field: String,
    pub temperature: ModelNumber,
    pub electronic_temperature: ModelNumber,
    pub pressure: ModelNumber,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self::new(ANY, ANY, ANY)
    }
}

impl ModelDescriptor {
    /// Creates a descriptor; every other field takes its documented default.
    pub fn new(
        method_family: impl Into<String>,
        method: impl Into<String>,
        basis_set: impl Into<String>,
    ) -> Self {
        Self {
            method_family: method_family.into(),
            method: method.into(),
            basis_set: basis_set.into(),
            spin_mode: ANY.to_string(),
            program: ANY.to_string(),
            version: ANY.to_string(),
            solvation: NONE.to_string(),
            solvent: NONE.to_string(),
            embedding: NONE.to_string(),
            periodic_boundaries: NONE.to_string(),
            external_field: NONE.to_string(),
            temperature: ModelNumber::Value(DEFAULT_TEMPERATURE_KELVIN),
            electronic_temperature: ModelNumber::Any,
            pressure: ModelNumber::Value(DEFAULT_PRESSURE_PASCAL),
        }
    }

    pub fn with_spin_mode(mut self, spin_mode: impl Into<String>) -> Self {
        self.spin_mode = spin_mode.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Descriptor whose every field is the wildcard; matches everything.
    pub fn wildcard() -> Self {
        let mut model = Self::new(ANY, ANY, ANY);
        for (_, value) in model.string_fields_mut() {
            *value = ANY.to_string();
        }
        model.temperature = ModelNumber::Any;
        model.electronic_temperature = ModelNumber::Any;
        model.pressure = ModelNumber::Any;
        model
    }

    /// Symmetric wildcard comparison over every field.
    pub fn matches(&self, other: &ModelDescriptor) -> bool {
        self.matches_except(other, None)
    }

    /// Like [`matches`](Self::matches) but ignores `periodic_boundaries`.
    pub fn equal_without_periodic_boundary_check(&self, other: &ModelDescriptor) -> bool {
        self.matches_except(other, Some("periodic_boundaries"))
    }

    fn matches_except(&self, other: &ModelDescriptor, skipped: Option<&str>) -> bool {
        let strings_agree = self
            .string_fields()
            .into_iter()
            .zip(other.string_fields())
            .filter(|((name, _), _)| Some(*name) != skipped)
            .all(|((_, left), (_, right))| strings_match(left, right));

        strings_agree
            && self
                .numeric_fields()
                .into_iter()
                .zip(other.numeric_fields())
                .all(|((_, left), (_, right))| left.matches(right))
    }

    /// Fills wildcard fields from `settings` and checks the rest agree.
    ///
    /// # Errors
    /// - A concrete model value that disagrees with the settings.
    /// - A model value that is not `none` while the settings lack the key.
    pub fn complete_model(&mut self, settings: &Settings) -> Result<(), ModelConflict> {
        for (name, value) in self.string_fields_mut() {
            if COMPLETION_SKIPPED.contains(&name) {
                continue;
            }
            match settings.get(name).map(setting_text) {
                Some(setting) if is_any(value) => *value = setting,
                Some(setting) => {
                    if !value.eq_ignore_ascii_case(&setting) && !(is_none(value) && is_none(&setting)) {
                        return Err(ModelConflict {
                            field: name,
                            model_value: value.clone(),
                            setting_value: Some(setting),
                        });
                    }
                }
                None if is_none(value) => {}
                None => {
                    return Err(ModelConflict {
                        field: name,
                        model_value: value.clone(),
                        setting_value: None,
                    })
                }
            }
        }

        for (name, value) in self.numeric_fields_mut() {
            let setting = settings.get(name);
            match (*value, setting) {
                (ModelNumber::Any, Some(raw)) => {
                    *value = setting_number(raw).map(ModelNumber::Value).ok_or_else(|| {
                        ModelConflict {
                            field: name,
                            model_value: ANY.to_string(),
                            setting_value: Some(setting_text(raw)),
                        }
                    })?;
                }
                (ModelNumber::Any, None) => *value = ModelNumber::None,
                (ModelNumber::None, None) => {}
                (ModelNumber::Value(expected), Some(raw))
                    if setting_number(raw)
                        .is_some_and(|actual| (actual - expected).abs() <= NUMERIC_TOLERANCE) => {}
                (current, raw) => {
                    return Err(ModelConflict {
                        field: name,
                        model_value: current.to_string(),
                        setting_value: raw.map(setting_text),
                    })
                }
            }
        }

        Ok(())
    }

    /// Writes the concrete model fields into `settings`.
    ///
    /// A wildcard model field keeps a concrete setting value as is.
    ///
    /// # Errors
    /// - A concrete model value whose key is missing from the settings.
    /// - A numeric setting present while the model holds `none`.
    pub fn complete_settings(&self, settings: &mut Settings) -> Result<(), ModelConflict> {
        for (name, value) in self.string_fields() {
            if COMPLETION_SKIPPED.contains(&name) {
                continue;
            }
            let Some(current) = settings.get(name).map(setting_text) else {
                if is_none(value) {
                    continue;
                }
                return Err(ModelConflict {
                    field: name,
                    model_value: value.to_string(),
                    setting_value: None,
                });
            };
            if is_any(value) && !is_none(&current) {
                continue;
            }
            settings.insert(name.to_string(), Value::String(value.to_string()));
        }

        for (name, value) in self.numeric_fields() {
            match (value, settings.contains_key(name)) {
                (ModelNumber::None, false) => {}
                (ModelNumber::None, true) | (ModelNumber::Value(_), false) => {
                    return Err(ModelConflict {
                        field: name,
                        model_value: value.to_string(),
                        setting_value: settings.get(name).map(setting_text),
                    })
                }
                (ModelNumber::Any, _) => {}
                (ModelNumber::Value(_), true) => {
                    settings.insert(name.to_string(), Value::from(value));
                }
            }
        }

        Ok(())
    }

    /// Store filter preselecting documents whose `<prefix>` model may match.
    ///
    /// String fields are pushed down exactly; numeric fields are left to
    /// in-process re-validation with [`matches`](Self::matches), because
    /// stored numbers may also be textual.
    pub fn to_filter(&self, prefix: &str) -> Filter {
        let clauses = self
            .string_fields()
            .into_iter()
            .filter(|(_, value)| !is_any(value))
            .map(|(name, value)| {
                let path = format!("{prefix}.{name}");
                if is_none(value) {
                    Filter::in_ignore_case(path, [NONE, "", ANY])
                } else {
                    Filter::in_ignore_case(path, [value, ANY])
                }
            })
            .collect::<Vec<_>>();
        Filter::and(clauses)
    }

    /// Multi-line `field: value` listing, for logs and diagnostics.
    pub fn to_string_representation(&self) -> String {
        let mut text = String::from("Model:\n");
        for (name, value) in self.string_fields() {
            text.push_str(&format!("  {name}: {value}\n"));
        }
        for (name, value) in self.numeric_fields() {
            text.push_str(&format!("  {name}: {value}\n"));
        }
        text
    }

    fn string_fields(&self) -> [(&'static str, &str); 11] {
        [
            ("method_family", &self.method_family),
            ("method", &self.method),
            ("basis_set", &self.basis_set),
            ("spin_mode", &self.spin_mode),
            ("program", &self.program),
            ("version", &self.version),
            ("solvation", &self.solvation),
            ("solvent", &self.solvent),
            ("embedding", &self.embedding),
            ("periodic_boundaries", &self.periodic_boundaries),
            ("external_field", &self.external_field),
        ]
    }

    fn string_fields_mut(&mut self) -> [(&'static str, &mut String); 11] {
        [
            ("method_family", &mut self.method_family),
            ("method", &mut self.method),
            ("basis_set", &mut self.basis_set),
            ("spin_mode", &mut self.spin_mode),
            ("program", &mut self.program),
            ("version", &mut self.version),
            ("solvation", &mut self.solvation),
            ("solvent", &mut self.solvent),
            ("embedding", &mut self.embedding),
            ("periodic_boundaries", &mut self.periodic_boundaries),
            ("external_field", &mut self.external_field),
        ]
    }

    fn numeric_fields(&self) -> [(&'static str, ModelNumber); 3] {
        [
            ("temperature", self.temperature),
            ("electronic_temperature", self.electronic_temperature),
            ("pressure", self.pressure),
        ]
    }

    fn numeric_fields_mut(&mut self) -> [(&'static str, &mut ModelNumber); 3] {
        [
            ("temperature", &mut self.temperature),
            ("electronic_temperature", &mut self.electronic_temperature),
            ("pressure", &mut self.pressure),
        ]
    }
}

// Sentinels compare literally; padded text is an ordinary value, exactly as
// the store-side `lower()` comparison in `to_filter` sees it.
fn is_any(value: &str) -> bool {
    value.eq_ignore_ascii_case(ANY)
}

fn is_none(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case(NONE)
}

fn strings_match(left: &str, right: &str) -> bool {
    if is_any(left) || is_any(right) {
        return true;
    }
    if is_none(left) || is_none(right) {
        return is_none(left) && is_none(right);
    }
    left.eq_ignore_ascii_case(right)
}

fn setting_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => NONE.to_string(),
        other => other.to_string(),
    }
}

fn setting_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelDescriptor, ModelNumber, Settings};
    use serde_json::json;

    fn settings(value: serde_json::Value) -> Settings {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn wildcard_matches_concrete_model() {
        let concrete = ModelDescriptor::new("dft", "pbe", "def2-svp");
        assert!(ModelDescriptor::new("any", "any", "any").matches(&concrete));
        assert!(ModelDescriptor::wildcard().matches(&concrete));
        assert!(concrete.matches(&ModelDescriptor::wildcard()));
    }

    #[test]
    fn family_with_wildcards_matches_every_model_of_that_family() {
        let dft_any = ModelDescriptor::new("dft", "any", "any");
        for (method, basis_set) in [("pbe", "def2-svp"), ("b3lyp", "6-31g"), ("pbe0", "cc-pvtz")] {
            assert!(dft_any.matches(&ModelDescriptor::new("dft", method, basis_set)));
        }
        assert!(!dft_any.matches(&ModelDescriptor::new("gfn2", "gfn2", "none")));
    }

    #[test]
    fn padded_sentinels_are_ordinary_values() {
        let concrete = ModelDescriptor::new("dft", "pbe", "def2-svp");
        assert!(!ModelDescriptor::new("dft", "any ", "def2-svp").matches(&concrete));

        let mut blank = concrete.clone();
        blank.solvation = "  ".to_string();
        assert!(!blank.matches(&concrete));
        assert!(blank.matches(&blank.clone()));
        assert!(serde_json::from_value::<ModelNumber>(json!(" any")).is_err());
    }

    #[test]
    fn differing_concrete_values_do_not_match() {
        let pbe = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let b3lyp = ModelDescriptor::new("dft", "b3lyp", "def2-svp");
        assert!(!pbe.matches(&b3lyp));
    }

    #[test]
    fn comparison_ignores_ascii_case() {
        let upper = ModelDescriptor::new("DFT", "PBE", "Def2-SVP");
        let lower = ModelDescriptor::new("dft", "pbe", "def2-svp");
        assert!(upper.matches(&lower));
    }

    #[test]
    fn none_matches_itself_empty_and_any_only() {
        let mut left = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let mut right = left.clone();
        right.solvation = String::new();
        assert!(left.matches(&right));

        right.solvation = "any".to_string();
        assert!(left.matches(&right));

        right.solvation = "cosmo".to_string();
        assert!(!left.matches(&right));

        left.solvation = "COSMO".to_string();
        assert!(left.matches(&right));
    }

    #[test]
    fn numeric_fields_use_tolerance_and_sentinels() {
        let left = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let mut right = left.clone();
        right.temperature = ModelNumber::Value(298.15 + 1e-14);
        assert!(left.matches(&right));

        right.temperature = ModelNumber::Value(310.0);
        assert!(!left.matches(&right));

        right.temperature = ModelNumber::None;
        assert!(!left.matches(&right));

        right.temperature = ModelNumber::Any;
        assert!(left.matches(&right));
    }

    #[test]
    fn periodic_boundary_check_can_be_skipped() {
        let left = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let mut right = left.clone();
        right.periodic_boundaries = "10.0,10.0,10.0,90.0,90.0,90.0,xyz".to_string();
        assert!(!left.matches(&right));
        assert!(left.equal_without_periodic_boundary_check(&right));
    }

    #[test]
    fn matching_is_not_transitive() {
        let a = ModelDescriptor::new("dft", "pbe", "any");
        let b = ModelDescriptor::new("dft", "any", "def2-svp");
        let c = ModelDescriptor::new("dft", "b3lyp", "def2-svp");
        assert!(a.matches(&b));
        assert!(b.matches(&c));
        assert!(!a.matches(&c));
    }

    #[test]
    fn numbers_deserialize_from_text_and_sentinels() {
        let value: ModelNumber = serde_json::from_value(json!("298.15")).unwrap();
        assert_eq!(value, ModelNumber::Value(298.15));
        let value: ModelNumber = serde_json::from_value(json!("ANY")).unwrap();
        assert_eq!(value, ModelNumber::Any);
        let value: ModelNumber = serde_json::from_value(json!("")).unwrap();
        assert_eq!(value, ModelNumber::None);
        assert!(serde_json::from_value::<ModelNumber>(json!("warm")).is_err());
        assert_eq!(serde_json::to_value(ModelNumber::Value(1.5)).unwrap(), json!(1.5));
    }

    #[test]
    fn complete_model_fills_wildcards_from_settings() {
        let mut model = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let input = settings(json!({
            "spin_mode": "restricted",
            "temperature": 298.15,
            "electronic_temperature": "400",
            "pressure": 101325.0,
            "method": "PBE",
            "basis_set": "def2-svp"
        }));

        model.complete_model(&input).unwrap();

        assert_eq!(model.spin_mode, "restricted");
        assert_eq!(model.electronic_temperature, ModelNumber::Value(400.0));
        assert_eq!(model.method, "pbe");
    }

    #[test]
    fn complete_model_reports_concrete_conflict() {
        let mut model = ModelDescriptor::new("dft", "pbe", "def2-svp").with_spin_mode("restricted");
        let input = settings(json!({
            "spin_mode": "unrestricted",
            "method": "pbe",
            "basis_set": "def2-svp",
            "temperature": 298.15,
            "pressure": 101325.0
        }));

        let conflict = model.complete_model(&input).unwrap_err();
        assert_eq!(conflict.field, "spin_mode");
        assert_eq!(conflict.setting_value.as_deref(), Some("unrestricted"));
    }

    #[test]
    fn complete_model_requires_concrete_fields_in_settings() {
        let mut model = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let conflict = model.complete_model(&Settings::new()).unwrap_err();
        assert_eq!(conflict.field, "method");
        assert_eq!(conflict.setting_value, None);
    }

    #[test]
    fn complete_settings_writes_concrete_model_fields() {
        let model = ModelDescriptor::new("dft", "pbe", "def2-svp");
        let mut target = settings(json!({
            "method": "b3lyp",
            "basis_set": "",
            "spin_mode": "unrestricted",
            "temperature": 0.0,
            "pressure": 1.0
        }));

        model.complete_settings(&mut target).unwrap();

        assert_eq!(target["method"], json!("pbe"));
        assert_eq!(target["basis_set"], json!("def2-svp"));
        assert_eq!(target["spin_mode"], json!("unrestricted"));
        assert_eq!(target["temperature"], json!(298.15));
        assert!(!target.contains_key("solvation"));
    }

    #[test]
    fn filter_skips_wildcards_and_numeric_fields() {
        let filter = ModelDescriptor::new("dft", "any", "any")
            .with_spin_mode("restricted")
            .to_filter("model");
        let text = filter.to_json().to_string();
        assert!(text.contains("model.method_family"));
        assert!(text.contains("model.spin_mode"));
        assert!(!text.contains("model.method\""));
        assert!(!text.contains("model.temperature"));
    }

    #[test]
    fn string_representation_lists_every_field() {
        let text = ModelDescriptor::new("dft", "pbe", "def2-svp").to_string_representation();
        assert!(text.starts_with("Model:\n"));
        assert!(text.contains("  basis_set: def2-svp\n"));
        assert!(text.contains("  temperature: 298.15\n"));
    }
}
