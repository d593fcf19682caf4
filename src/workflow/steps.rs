//! Step kinds a workflow file can declare.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ports::{PortInput, PortSource};
use super::state::{Context, WorkflowState, lookup_path};
use super::step::{RuntimeContext, Step, StepOutput};
use super::transition::{Transition, TransitionSpec, stringify};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid"));

/// A step as written in a workflow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub next: TransitionSpec,
    /// Input slot → `<step>.<slot>` of an earlier step's output port.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, PortSource>,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// One conversation turn with the language model.
    Llm {
        prompt: String,
        #[serde(default)]
        output_key: Option<String>,
    },
    /// `sh -c <command>`; a non-zero exit fails the attempt.
    Shell {
        command: String,
        #[serde(default)]
        output_key: Option<String>,
    },
    /// No side effects; sets literal values and branches.
    Decide {
        #[serde(default)]
        set: Context,
    },
    Http {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        output_key: Option<String>,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Llm { .. } => "llm",
            StepKind::Shell { .. } => "shell",
            StepKind::Decide { .. } => "decide",
            StepKind::Http { .. } => "http",
        }
    }

    pub fn needs_llm(&self) -> bool {
        matches!(self, StepKind::Llm { .. })
    }
}

/// [`Step`] implementation driven by a [`StepConfig`].
#[derive(Debug, Clone)]
pub struct DeclaredStep {
    name: String,
    kind: StepKind,
    transition: Transition,
    inputs: Vec<PortInput>,
}

impl From<StepConfig> for DeclaredStep {
    fn from(config: StepConfig) -> Self {
        let inputs = config
            .inputs
            .into_iter()
            .map(|(slot, source)| PortInput { slot, source })
            .collect();
        Self {
            name: config.name,
            kind: config.kind,
            transition: config.next.into(),
            inputs,
        }
    }
}

impl DeclaredStep {
    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    fn output_key<'a>(&'a self, configured: &'a Option<String>) -> &'a str {
        configured.as_deref().unwrap_or(&self.name)
    }
}

#[async_trait]
impl Step for DeclaredStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: &WorkflowState, rt: &RuntimeContext) -> anyhow::Result<StepOutput> {
        match &self.kind {
            StepKind::Llm { prompt, output_key } => {
                let llm = rt
                    .llm
                    .as_ref()
                    .context("llm step needs a language model; set ANTHROPIC_API_KEY or api_key")?;
                let prompt = render(prompt, state, &rt.inputs);
                rt.logger.debug("sending prompt");
                let turn = llm.run_turn(&prompt, &state.conversation_history).await?;
                Ok(StepOutput::new()
                    .set(self.output_key(output_key), turn.text.clone())
                    .port("response", turn.text)
                    .history(turn.history))
            }
            StepKind::Shell { command, output_key } => {
                let command = render(command, state, &rt.inputs);
                rt.logger.info(&format!("running `{command}`"));
                let output = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .output()
                    .await
                    .with_context(|| format!("failed to spawn `{command}`"))?;

                let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    bail!("`{command}` exited with {}: {}", output.status, stderr.trim());
                }
                let exit_code = output.status.code().unwrap_or(0);
                Ok(StepOutput::new()
                    .set(self.output_key(output_key), stdout.clone())
                    .port("stdout", stdout)
                    .port("exit_code", exit_code))
            }
            StepKind::Decide { set } => {
                let update = set
                    .iter()
                    .map(|(k, v)| (k.clone(), render_value(v, state, &rt.inputs)))
                    .collect();
                Ok(StepOutput {
                    update,
                    ..StepOutput::default()
                })
            }
            StepKind::Http {
                method,
                url,
                body,
                output_key,
            } => {
                let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .with_context(|| format!("invalid HTTP method '{method}'"))?;
                let url = render(url, state, &rt.inputs);
                rt.logger.info(&format!("{method} {url}"));

                let mut request = rt.http.request(method.clone(), &url);
                if let Some(body) = body {
                    request = request.json(&render_value(body, state, &rt.inputs));
                }
                let response = request.send().await.with_context(|| format!("{method} {url} failed"))?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    bail!("{method} {url} returned {status}: {text}");
                }
                let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
                Ok(StepOutput::new()
                    .set(self.output_key(output_key), value.clone())
                    .port("response", value)
                    .port("status", status.as_u16()))
            }
        }
    }

    fn next(&self, state: &WorkflowState) -> anyhow::Result<String> {
        Ok(self.transition.resolve(state))
    }

    fn inputs(&self) -> Vec<PortInput> {
        self.inputs.clone()
    }
}

/// Replaces `{{path}}` with the value at `path`, looked up in the port
/// inputs first and then in the context. Unknown placeholders are kept.
pub fn render(template: &str, state: &WorkflowState, inputs: &Context) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let path = &caps[1];
            lookup_path(inputs, path)
                .or_else(|| state.lookup(path))
                .map(stringify)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn render_value(value: &Value, state: &WorkflowState, inputs: &Context) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, state, inputs)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, state, inputs)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, state, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}
