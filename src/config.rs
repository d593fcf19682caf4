//! Configuração do issueflow carregada a partir de `issueflow.toml`.
//!
//! [`IssueflowConfig`] guarda os valores do arquivo (todos opcionais, com
//! defaults). [`DispatchConfig`] combina flags da CLI, arquivo e ambiente na
//! configuração efetiva de uma execução de dispatch: flag primeiro, depois
//! ambiente (`GITHUB_TOKEN`, `GITHUB_REPOSITORY`), depois arquivo.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::anthropic::DEFAULT_MODEL;
use crate::cli::{DispatchArgs, SourceArg};
use crate::dispatch::{DispatchOptions, ItemSource};
use crate::error::DispatchError;
use crate::tracker::ProjectRef;
use crate::workflow::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "issueflow.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IssueflowConfig {
    /// Chave da API Anthropic; `ANTHROPIC_API_KEY` tem precedência.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Retentativas por step antes de marcar o workflow como falho.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base do backoff entre tentativas; 0 retenta imediatamente.
    #[serde(default)]
    pub base_delay_ms: u64,

    /// Diretório dos checkpoints de workflow.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Label usada quando `--label` não é informado.
    #[serde(default = "default_label")]
    pub default_label: String,

    /// Status do quadro de projeto que marca itens prontos.
    #[serde(default = "default_ready_status")]
    pub ready_status: String,

    #[serde(default)]
    pub in_progress_status: Option<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".issueflow/state")
}

fn default_label() -> String {
    "ready".to_string()
}

fn default_ready_status() -> String {
    "Ready".to_string()
}

impl Default for IssueflowConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            max_retries: default_max_retries(),
            base_delay_ms: 0,
            state_dir: default_state_dir(),
            default_label: default_label(),
            ready_status: default_ready_status(),
            in_progress_status: None,
        }
    }
}

impl IssueflowConfig {
    /// Carrega `path`, ou os defaults se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self, DispatchError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<IssueflowConfig>(&contents)
                .map_err(|e| DispatchError::InvalidConfig(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para a chave API.
        if let Some(key) = env("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    pub fn api_key(&self) -> Option<&str> {
        Some(self.api_key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
        }
    }
}

/// Configuração efetiva de um `issueflow dispatch`.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub token: String,
    pub options: DispatchOptions,
    pub output: Option<PathBuf>,
}

impl DispatchConfig {
    /// Falha com `INVALID_CONFIG` antes de qualquer chamada de rede quando
    /// token, owner ou repo não puderem ser resolvidos.
    pub fn resolve(
        args: &DispatchArgs,
        file: &IssueflowConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DispatchError> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let token = non_empty(args.token.clone())
            .or_else(|| non_empty(env("GITHUB_TOKEN")))
            .ok_or_else(|| DispatchError::InvalidConfig("missing GitHub token: pass --token or set GITHUB_TOKEN".into()))?;

        let env_repository = non_empty(env("GITHUB_REPOSITORY")).and_then(|full| {
            match full.split_once('/') {
                Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() => {
                    Some((owner.to_string(), repo.to_string()))
                }
                _ => {
                    tracing::warn!(value = %full, "ignoring GITHUB_REPOSITORY, expected owner/repo");
                    None
                }
            }
        });

        let owner = non_empty(args.owner.clone())
            .or_else(|| env_repository.as_ref().map(|(owner, _)| owner.clone()))
            .ok_or_else(|| {
                DispatchError::InvalidConfig("missing repository owner: pass --owner or set GITHUB_REPOSITORY".into())
            })?;
        let repo = non_empty(args.repo.clone())
            .or_else(|| env_repository.as_ref().map(|(_, repo)| repo.clone()))
            .ok_or_else(|| {
                DispatchError::InvalidConfig("missing repository name: pass --repo or set GITHUB_REPOSITORY".into())
            })?;

        let source = match args.source {
            SourceArg::Label => ItemSource::Label(
                non_empty(args.label.clone()).unwrap_or_else(|| file.default_label.clone()),
            ),
            SourceArg::Project => {
                let number = parse_positive_int(args.project_number.as_deref()).ok_or_else(|| {
                    DispatchError::InvalidConfig("--project-number is required for --source project".into())
                })?;
                ItemSource::Project {
                    project: ProjectRef {
                        owner: non_empty(args.project_owner.clone()).unwrap_or_else(|| owner.clone()),
                        number: number as u64,
                    },
                    status: non_empty(args.ready_status.clone()).unwrap_or_else(|| file.ready_status.clone()),
                }
            }
        };

        Ok(Self {
            token,
            options: DispatchOptions {
                owner,
                repo,
                source,
                max_concurrent: parse_positive_int(args.max_concurrent.as_deref()),
                in_progress_status: non_empty(args.in_progress.clone()).or_else(|| file.in_progress_status.clone()),
                dry_run: args.dry_run,
                fail_on_cycle: args.fail_on_cycle,
            },
            output: args.output.clone(),
        })
    }
}

/// Inteiros positivos; qualquer outra entrada é ignorada silenciosamente.
pub fn parse_positive_int(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|s| s.trim().parse::<usize>().ok()).filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use crate::error::ErrorKind;
    use clap::Parser;
    use std::collections::HashMap;

    fn dispatch_args(argv: &[&str]) -> DispatchArgs {
        let mut full = vec!["issueflow", "dispatch"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Dispatch(args) => args,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_values() {
        let config = IssueflowConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 0);
        assert_eq!(config.state_dir, PathBuf::from(".issueflow/state"));
        assert_eq!(config.default_label, "ready");
        assert!(config.api_key().is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_and_env_overrides_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issueflow.toml");
        std::fs::write(&path, "api_key = \"from-file\"\nmax_retries = 5\n").unwrap();

        let config = IssueflowConfig::load_with_env(&path, env_of(&[])).unwrap();
        assert_eq!(config.api_key(), Some("from-file"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.ready_status, "Ready");

        let config = IssueflowConfig::load_with_env(&path, env_of(&[("ANTHROPIC_API_KEY", "from-env")])).unwrap();
        assert_eq!(config.api_key(), Some("from-env"));
    }

    #[test]
    fn missing_file_uses_defaults_and_bad_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = IssueflowConfig::load_with_env(&dir.path().join("absent.toml"), env_of(&[])).unwrap();
        assert_eq!(config, IssueflowConfig::default());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_retries = \"many\"").unwrap();
        let err = IssueflowConfig::load_with_env(&path, env_of(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn flags_win_over_environment() {
        let args = dispatch_args(&["--owner", "me", "--repo", "mine", "--token", "t-flag"]);
        let env = env_of(&[("GITHUB_TOKEN", "t-env"), ("GITHUB_REPOSITORY", "acme/widgets")]);
        let resolved = DispatchConfig::resolve(&args, &IssueflowConfig::default(), env).unwrap();
        assert_eq!(resolved.token, "t-flag");
        assert_eq!(resolved.options.owner, "me");
        assert_eq!(resolved.options.repo, "mine");
        assert_eq!(resolved.options.source, ItemSource::Label("ready".into()));
    }

    #[test]
    fn environment_fills_missing_flags() {
        let args = dispatch_args(&["--label", "agent", "--max-concurrent", "3", "--dry-run"]);
        let env = env_of(&[("GITHUB_TOKEN", "t-env"), ("GITHUB_REPOSITORY", "acme/widgets")]);
        let resolved = DispatchConfig::resolve(&args, &IssueflowConfig::default(), env).unwrap();
        assert_eq!(resolved.token, "t-env");
        assert_eq!(resolved.options.owner, "acme");
        assert_eq!(resolved.options.repo, "widgets");
        assert_eq!(resolved.options.source, ItemSource::Label("agent".into()));
        assert_eq!(resolved.options.max_concurrent, Some(3));
        assert!(resolved.options.dry_run);
    }

    #[test]
    fn missing_required_values_are_invalid_config() {
        let no_token = DispatchConfig::resolve(
            &dispatch_args(&["--owner", "a", "--repo", "b"]),
            &IssueflowConfig::default(),
            env_of(&[]),
        )
        .unwrap_err();
        assert_eq!(no_token.kind(), ErrorKind::InvalidConfig);
        assert!(no_token.to_string().contains("token"));

        let no_repo = DispatchConfig::resolve(
            &dispatch_args(&["--token", "t"]),
            &IssueflowConfig::default(),
            env_of(&[("GITHUB_REPOSITORY", "not-a-pair")]),
        )
        .unwrap_err();
        assert_eq!(no_repo.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn project_source_resolution() {
        let args = dispatch_args(&[
            "--token",
            "t",
            "--owner",
            "acme",
            "--repo",
            "widgets",
            "--source",
            "project",
            "--project-number",
            "7",
            "--in-progress",
            "In Progress",
        ]);
        let resolved = DispatchConfig::resolve(&args, &IssueflowConfig::default(), env_of(&[])).unwrap();
        assert_eq!(
            resolved.options.source,
            ItemSource::Project {
                project: ProjectRef {
                    owner: "acme".into(),
                    number: 7
                },
                status: "Ready".into()
            }
        );
        assert_eq!(resolved.options.in_progress_status.as_deref(), Some("In Progress"));

        let missing_number = dispatch_args(&["--token", "t", "--owner", "a", "--repo", "b", "--source", "project", "--project-number", "x"]);
        let err = DispatchConfig::resolve(&missing_number, &IssueflowConfig::default(), env_of(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn positive_int_parsing_ignores_garbage() {
        assert_eq!(parse_positive_int(Some("4")), Some(4));
        assert_eq!(parse_positive_int(Some(" 12 ")), Some(12));
        assert_eq!(parse_positive_int(Some("0")), None);
        assert_eq!(parse_positive_int(Some("-2")), None);
        assert_eq!(parse_positive_int(Some("lots")), None);
        assert_eq!(parse_positive_int(None), None);
    }
}
