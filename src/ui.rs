//! Saída de terminal do issueflow: spinner e resumos coloridos.
//!
//! Tudo aqui escreve em stderr; stdout fica reservado para o JSON que
//! outras ferramentas consomem.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatch::{DispatchResult, ResolvedItem};
use crate::workflow::{ValidationReport, WorkflowState, WorkflowStatus};

/// Spinner exibido enquanto uma operação longa roda.
pub struct Progress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl Progress {
    pub fn start(message: impl Into<String>) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.into());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    pub fn success(&self, message: &str) {
        self.pb.finish_and_clear();
        eprintln!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn failure(&self, message: &str) {
        self.pb.finish_and_clear();
        eprintln!("  {} {message}", self.red.apply_to("✗"));
    }
}

fn item_line(item: &ResolvedItem) -> String {
    format!("{} [{}] {}", item.id(), item.priority.as_str(), item.item.title)
}

/// Resumo legível de uma execução de dispatch.
pub fn print_dispatch_summary(result: &DispatchResult) {
    let bold = Style::new().bold();
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    let title = if result.dry_run {
        "─── Dispatch (dry run) ───"
    } else {
        "─── Dispatch ───"
    };
    eprintln!();
    eprintln!("{}", bold.apply_to(title));
    eprintln!(
        "  fetched {}, open {}, ready {}, deferred {}, blocked {}, parents {}",
        result.total_fetched,
        result.total_open,
        result.ready.len(),
        result.deferred.len(),
        result.blocked.len(),
        result.parents.len()
    );

    for item in &result.ready {
        eprintln!("  {} {}", green.apply_to("▶"), item_line(item));
    }
    for item in &result.deferred {
        eprintln!("  {} {}", dim.apply_to("…"), item_line(item));
    }
    for item in &result.blocked {
        let blockers: Vec<String> = item.blocked_by.iter().map(ToString::to_string).collect();
        eprintln!(
            "  {} {} (blocked by {})",
            yellow.apply_to("■"),
            item_line(item),
            blockers.join(", ")
        );
    }
    for cycle in &result.cycles {
        eprintln!("  {} cycle: {}", yellow.apply_to("↻"), cycle.description);
    }
    if result.ready.is_empty() {
        eprintln!("  {}", dim.apply_to("no ready items"));
    }
}

pub fn print_workflow_state(state: &WorkflowState) {
    let style = match state.status {
        WorkflowStatus::Completed => Style::new().green().bold(),
        WorkflowStatus::Failed => Style::new().red().bold(),
        WorkflowStatus::Running | WorkflowStatus::Pending => Style::new().yellow(),
    };
    eprintln!(
        "{} {} at step '{}' (updated {})",
        style.apply_to(state.status),
        state.instance_id,
        state.current_step,
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

pub fn print_validation(name: &str, report: &ValidationReport) {
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    for error in &report.errors {
        eprintln!("  {} {error}", red.apply_to("error:"));
    }
    for warning in &report.warnings {
        eprintln!("  {} {warning}", yellow.apply_to("warning:"));
    }
    if report.is_valid() {
        eprintln!("  {} workflow '{name}' is valid", Style::new().green().bold().apply_to("✓"));
    }
}
