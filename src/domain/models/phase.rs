//! Phase definitions — the nodes of a workflow's dependency DAG.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether a phase acquires or releases an activation slot (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSlot {
    #[default]
    None,
    Acquire,
    Release,
}

/// A named input or output on a phase's contract, used for static wiring
/// validation at workflow-registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractField {
    pub name: String,
    pub type_hint: String,
}

impl ContractField {
    pub fn new(name: impl Into<String>, type_hint: impl Into<String>) -> Self {
        Self { name: name.into(), type_hint: type_hint.into() }
    }
}

/// Typed wiring contract a phase declares: what it reads, what it produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseContract {
    pub inputs: Vec<ContractField>,
    pub outputs: Vec<ContractField>,
}

/// How many upstream API calls a phase is expected to make per unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ApiCallEstimate {
    Fixed(u32),
    /// The phase's call count depends on runtime data (e.g. number of APs).
    Dynamic,
}

/// A skip predicate evaluated against a job's `options` / `input_data`
/// before a phase is dispatched.
///
/// Kept as a small closed expression language rather than an embedded
/// interpreter: the original system used `eval()` over two dict keys
/// (`options`, `input_data`) and only ever compared a single field to a
/// boolean or string literal. We model exactly that shape so it stays
/// data (serializable, inspectable) instead of code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipIf {
    /// Dotted path, e.g. "options.include_policy_sets".
    pub field: String,
    pub equals: serde_json::Value,
}

impl SkipIf {
    pub fn evaluate(&self, options: &HashMap<String, serde_json::Value>, input_data: &serde_json::Value) -> bool {
        let value = self.resolve(options, input_data);
        value.as_ref() == Some(&self.equals)
    }

    fn resolve(&self, options: &HashMap<String, serde_json::Value>, input_data: &serde_json::Value) -> Option<serde_json::Value> {
        let mut parts = self.field.splitn(2, '.');
        let root = parts.next()?;
        let rest = parts.next();
        let base = match root {
            "options" => serde_json::Value::Object(options.clone().into_iter().collect()),
            "input_data" => input_data.clone(),
            _ => return None,
        };
        match rest {
            None => Some(base),
            Some(path) => path.split('.').try_fold(base, |acc, key| acc.get(key).cloned()),
        }
    }
}

/// A node in the workflow DAG (spec §3, `PhaseDefinition`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub per_unit: bool,
    pub critical: bool,
    pub skip_if: Option<SkipIf>,
    pub activation_slot: ActivationSlot,
    pub contract: PhaseContract,
    pub api_calls_per_unit: ApiCallEstimate,
}

impl PhaseDefinition {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> PhaseDefinitionBuilder {
        PhaseDefinitionBuilder::new(id, name)
    }
}

/// Builder for [`PhaseDefinition`] — workflows are assembled once at process
/// startup and registered, so ergonomics matter more than runtime cost here.
pub struct PhaseDefinitionBuilder {
    inner: PhaseDefinition,
}

impl PhaseDefinitionBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            inner: PhaseDefinition {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                depends_on: Vec::new(),
                per_unit: true,
                critical: true,
                skip_if: None,
                activation_slot: ActivationSlot::None,
                contract: PhaseContract::default(),
                api_calls_per_unit: ApiCallEstimate::Fixed(1),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inner.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn per_unit(mut self, per_unit: bool) -> Self {
        self.inner.per_unit = per_unit;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.inner.critical = critical;
        self
    }

    pub fn skip_if(mut self, skip_if: SkipIf) -> Self {
        self.inner.skip_if = Some(skip_if);
        self
    }

    pub fn activation_slot(mut self, slot: ActivationSlot) -> Self {
        self.inner.activation_slot = slot;
        self
    }

    pub fn contract(mut self, contract: PhaseContract) -> Self {
        self.inner.contract = contract;
        self
    }

    pub fn api_calls_per_unit(mut self, estimate: ApiCallEstimate) -> Self {
        self.inner.api_calls_per_unit = estimate;
        self
    }

    pub fn build(self) -> PhaseDefinition {
        self.inner
    }
}

/// Runtime status of a single phase (per-unit or global).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_if_matches_nested_options_field() {
        let mut options = HashMap::new();
        options.insert("include_policy_sets".to_string(), serde_json::json!(false));
        let skip = SkipIf { field: "options.include_policy_sets".to_string(), equals: serde_json::json!(false) };
        assert!(skip.evaluate(&options, &serde_json::json!({})));
    }

    #[test]
    fn skip_if_false_when_field_missing() {
        let options = HashMap::new();
        let skip = SkipIf { field: "options.missing".to_string(), equals: serde_json::json!(true) };
        assert!(!skip.evaluate(&options, &serde_json::json!({})));
    }

    #[test]
    fn skip_if_reads_input_data_path() {
        let options = HashMap::new();
        let input_data = serde_json::json!({"request": {"dry_run": true}});
        let skip = SkipIf { field: "input_data.request.dry_run".to_string(), equals: serde_json::json!(true) };
        assert!(skip.evaluate(&options, &input_data));
    }
}
