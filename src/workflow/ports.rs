//! Port data flow: named output slots of one step wired into named input
//! slots of a later step, independent of control-flow transitions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::Context;

/// Where an input slot reads from: `<step>.<slot>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSource {
    pub step: String,
    pub slot: String,
}

impl FromStr for PortSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((step, slot)) if !step.is_empty() && !slot.is_empty() => Ok(Self {
                step: step.to_string(),
                slot: slot.to_string(),
            }),
            _ => Err(format!("port source '{s}' must look like <step>.<slot>")),
        }
    }
}

impl TryFrom<String> for PortSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortSource> for String {
    fn from(source: PortSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step, self.slot)
    }
}

/// A declared input slot of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInput {
    pub slot: String,
    pub source: PortSource,
}

impl PortInput {
    pub fn new(slot: impl Into<String>, step: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            source: PortSource {
                step: step.into(),
                slot: output.into(),
            },
        }
    }
}

/// Latest output values by producing step, then by slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortStore(BTreeMap<String, BTreeMap<String, Value>>);

impl PortStore {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces the outputs of `step` with the values it just produced.
    pub fn record(&mut self, step: &str, outputs: Context) {
        if outputs.is_empty() {
            return;
        }
        self.0.insert(step.to_string(), outputs.into_iter().collect());
    }

    pub fn get(&self, step: &str, slot: &str) -> Option<&Value> {
        self.0.get(step).and_then(|slots| slots.get(slot))
    }

    /// Values for the declared inputs; unresolved inputs are left out.
    pub fn resolve(&self, inputs: &[PortInput]) -> Context {
        inputs
            .iter()
            .filter_map(|input| {
                self.get(&input.source.step, &input.source.slot)
                    .map(|v| (input.slot.clone(), v.clone()))
            })
            .collect()
    }
}
