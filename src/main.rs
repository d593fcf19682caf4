use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use issueflow::anthropic::{AnthropicClient, ConversationModel};
use issueflow::cli::{Cli, Command, DispatchArgs, WorkflowCommand};
use issueflow::config::{DispatchConfig, IssueflowConfig};
use issueflow::dispatch::Dispatcher;
use issueflow::error::DispatchError;
use issueflow::tracker::GitHubClient;
use issueflow::ui::{self, Progress};
use issueflow::workflow::{Context, StateStore, WorkflowDefinition, WorkflowEngine, WorkflowStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<DispatchError>() {
                Some(dispatch) => eprintln!("error[{}]: {dispatch}", dispatch.kind()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("ISSUEFLOW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "issueflow=debug,warn" } else { "issueflow=info,warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = IssueflowConfig::load(&cli.config)?;
    match cli.command {
        Command::Dispatch(args) => Ok(dispatch(args, &config).await?),
        Command::Workflow { command } => workflow(command, &config).await,
    }
}

async fn dispatch(args: DispatchArgs, config: &IssueflowConfig) -> Result<(), DispatchError> {
    let env = |key: &str| std::env::var(key).ok();
    let resolved = DispatchConfig::resolve(&args, config, env)?;
    let client = GitHubClient::new(
        resolved.token.clone(),
        resolved.options.owner.clone(),
        resolved.options.repo.clone(),
    )?;

    let progress = Progress::start(format!(
        "Resolving {}/{}...",
        resolved.options.owner, resolved.options.repo
    ));
    let result = match Dispatcher::new(&client, resolved.options).run().await {
        Ok(result) => {
            progress.success(&format!("{} item(s) ready", result.matrix.len()));
            result
        }
        Err(e) => {
            progress.failure("dispatch failed");
            return Err(e);
        }
    };

    ui::print_dispatch_summary(&result);
    println!("{}", result.matrix.to_json_pretty()?);

    if let Some(path) = &resolved.output {
        result.matrix.write_to_file(path)?;
        tracing::info!(path = %path.display(), "matrix written");
    }
    if result.matrix.write_ci_output(env)? {
        tracing::debug!("matrix exported to GITHUB_OUTPUT");
    }
    Ok(())
}

async fn workflow(command: WorkflowCommand, config: &IssueflowConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&config.state_dir);
    match command {
        WorkflowCommand::Run { file, id, context } => {
            let definition = WorkflowDefinition::load(&file)?;
            let llm: Option<Arc<dyn ConversationModel>> = match config.api_key() {
                Some(key) => Some(Arc::new(
                    AnthropicClient::new(key.to_string())?.with_model(&config.model),
                )),
                None => None,
            };

            let mut retry = config.retry_policy();
            if let Some(max_retries) = definition.max_retries {
                retry.max_retries = max_retries;
            }
            let start = definition.start.clone();
            let steps = definition.into_steps(Some(llm.is_some()))?;
            let engine = WorkflowEngine::builder(start, store)
                .steps(steps)
                .retry(retry)
                .llm(llm)
                .build()?;

            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let context = parse_context(context.as_deref())?;

            let progress = Progress::start(format!("Running workflow {id}"));
            let state = match engine.run(&id, context).await {
                Ok(state) => state,
                Err(e) => {
                    progress.failure(&format!("workflow {id} failed"));
                    if let Some(state) = engine.get_state(&id) {
                        ui::print_workflow_state(&state);
                    }
                    return Err(e.into());
                }
            };
            if state.status == WorkflowStatus::Completed {
                progress.success(&format!("workflow {id} completed"));
            } else {
                progress.failure(&format!("workflow {id} ended at {}", state.current_step));
            }
            ui::print_workflow_state(&state);
            println!("{}", serde_json::to_string_pretty(&state)?);
            if state.status != WorkflowStatus::Completed {
                bail!("workflow {id} finished as {}", state.status);
            }
        }
        WorkflowCommand::Status { id } => {
            let Some(state) = store.load(&id) else {
                bail!("no stored workflow '{id}' in {}", store.dir().display());
            };
            ui::print_workflow_state(&state);
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        WorkflowCommand::List => {
            for id in store.list()? {
                println!("{id}");
            }
        }
        WorkflowCommand::Delete { id } => {
            store.delete(&id)?;
            eprintln!("deleted {id}");
        }
        WorkflowCommand::Validate { file } => {
            let definition = WorkflowDefinition::load(&file)?;
            let report = definition.validate(None);
            ui::print_validation(&definition.name, &report);
            if !report.is_valid() {
                bail!("{} error(s) in {}", report.errors.len(), file.display());
            }
        }
    }
    Ok(())
}

fn parse_context(raw: Option<&str>) -> anyhow::Result<Context> {
    let Some(raw) = raw else {
        return Ok(Context::new());
    };
    match serde_json::from_str::<Value>(raw).context("--context is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--context must be a JSON object, got {other}"),
    }
}
