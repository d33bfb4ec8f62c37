//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{Configuration, ValidationResult, Value};
use crate::planner::{
    ApplyReport, DriftEntry, DriftKind, OperationKind, OperationStatus, OutputValue, Plan, RunStatus,
};
use crate::state::{LockInfo, StateRecord, StateSnapshot};

use super::commands::OutputFormat;

/// Placeholder shown instead of sensitive values.
const SENSITIVE: &str = "(sensitive)";

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Apply result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Time")]
    time: String,
}

/// State record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when producing JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    fn json<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &Configuration,
        result: &ValidationResult,
        resources: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&serde_json::json!({
                "valid": result.is_valid(),
                "project": config.project.name,
                "variables": config.variables.len(),
                "resources": resources,
                "outputs": config.outputs.len(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  - {warning}");
                    }
                }
                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "  Project: {}", config.project.name);
                let _ = writeln!(output, "  Variables: {}", config.variables.len());
                let _ = writeln!(output, "  Resource instances: {resources}");
                let _ = writeln!(output, "  Outputs: {}", config.outputs.len());
                output
            }
        }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => Self::json(plan),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes. Infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let title = if plan.destroy { "Destroy Plan" } else { "Execution Plan" };
        let _ = write!(output, "\n{}\n", title.bold());
        let _ = write!(
            output,
            "   Config digest: {}\n\n",
            &plan.config_digest[..8.min(plan.config_digest.len())]
        );

        let rows: Vec<OperationRow> = plan
            .changes()
            .enumerate()
            .map(|(i, op)| OperationRow {
                index: i + 1,
                action: Self::format_kind(op.kind),
                resource: op.address.to_string(),
                changes: Self::truncate(
                    &op.changes
                        .iter()
                        .map(|c| {
                            if c.forces_replacement {
                                format!("{} (forces replacement)", c.attribute)
                            } else {
                                c.attribute.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                    60,
                ),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().yellow(),
            summary.destroy.to_string().red()
        );
        output
    }

    /// Formats the attribute-level changes of a plan.
    #[must_use]
    pub fn format_plan_details(&self, plan: &Plan) -> String {
        let mut output = String::new();
        for op in plan.changes() {
            let _ = writeln!(output, "\n  {} {}", Self::format_kind(op.kind), op.address);
            for change in &op.changes {
                let old = change.old.as_ref().map_or_else(|| String::from("-"), Value::to_string);
                let new = change.new.as_ref().map_or_else(|| String::from("-"), Value::to_string);
                let marker = if change.forces_replacement {
                    " # forces replacement".red().to_string()
                } else {
                    String::new()
                };
                let _ = writeln!(
                    output,
                    "      {}: {} -> {}{marker}",
                    change.attribute,
                    Self::truncate(&old, 50),
                    Self::truncate(&new, 50)
                );
            }
        }
        output
    }

    /// Formats the result of an apply or destroy run.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                let mut output = String::new();
                if !report.results.is_empty() {
                    let rows: Vec<ResultRow> = report
                        .results
                        .iter()
                        .map(|r| ResultRow {
                            resource: r.address.to_string(),
                            action: r.kind.to_string(),
                            status: Self::format_status(r.status),
                            id: r.identity.clone().unwrap_or_default(),
                            time: format!("{}ms", r.duration_ms),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let failures: Vec<String> = report
                    .results
                    .iter()
                    .filter(|r| r.status == OperationStatus::Failed)
                    .map(|r| format!("{}: {}", r.address, r.error.as_deref().unwrap_or("unknown error")))
                    .collect();
                if !failures.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for failure in &failures {
                        let _ = writeln!(output, "   - {failure}");
                    }
                }

                let status = match report.status {
                    RunStatus::Success => format!("{} Apply complete", "✓".green()),
                    RunStatus::PartialFailure => format!("{} Apply partially failed", "✗".red()),
                    RunStatus::Aborted => format!("{} Apply aborted", "✗".red()),
                };
                let _ = writeln!(
                    output,
                    "\n{status}: {} succeeded, {} failed, {} skipped",
                    report.succeeded(),
                    report.failed(),
                    report.skipped()
                );

                if !report.outputs.is_empty() {
                    output.push_str("\nOutputs:\n\n");
                    output.push_str(&Self::format_outputs_text(&report.outputs));
                }
                output
            }
        }
    }

    /// Formats output values.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, OutputValue>) -> String {
        match self.format {
            OutputFormat::Json => Self::json(outputs),
            OutputFormat::Text if outputs.is_empty() => String::from("No outputs.\n"),
            OutputFormat::Text => Self::format_outputs_text(outputs),
        }
    }

    fn format_outputs_text(outputs: &BTreeMap<String, OutputValue>) -> String {
        let mut output = String::new();
        for (name, value) in outputs {
            let rendered = if value.sensitive {
                SENSITIVE.dimmed().to_string()
            } else {
                value.value.to_string()
            };
            let _ = writeln!(output, "{} = {rendered}", name.bold());
        }
        output
    }

    /// Formats a single output value; sensitive values are shown as-is.
    #[must_use]
    pub fn format_output_value(&self, value: &OutputValue) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&value.value),
            OutputFormat::Text => format!("{}\n", value.value),
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, drift: &[DriftEntry], total: usize) -> String {
        match self.format {
            OutputFormat::Json => Self::json(drift),
            OutputFormat::Text => {
                if drift.is_empty() {
                    return format!("{} No drift detected.\n", "✓".green());
                }
                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for entry in drift {
                    match entry.kind {
                        DriftKind::Missing => {
                            let _ = writeln!(output, "   - {} {}", entry.address, "(deleted)".red());
                        }
                        DriftKind::Changed => {
                            let names: Vec<&str> =
                                entry.changes.iter().map(|c| c.attribute.as_str()).collect();
                            let _ = writeln!(output, "   - {} ({})", entry.address, names.join(", "));
                        }
                    }
                }
                let _ = write!(output, "\n{}/{total} resources have drifted.\n", drift.len());
                output
            }
        }
    }

    /// Formats the recorded resources.
    #[must_use]
    pub fn format_state_list(&self, snapshot: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&snapshot.values().collect::<Vec<_>>()),
            OutputFormat::Text => {
                if snapshot.is_empty() {
                    return String::from("No resources recorded.\n");
                }
                let rows: Vec<RecordRow> = snapshot
                    .values()
                    .map(|r| RecordRow {
                        resource: r.address.to_string(),
                        id: r.identity.clone(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats one recorded resource.
    #[must_use]
    pub fn format_record(&self, record: &StateRecord) -> String {
        match self.format {
            OutputFormat::Json => Self::json(record),
            OutputFormat::Text => {
                let mut output = format!("\n{}\n\n", record.address.to_string().bold());
                let _ = writeln!(output, "   ID: {}", record.identity);
                let _ = writeln!(output, "   Created: {}", record.created_at);
                let _ = writeln!(output, "   Updated: {}", record.updated_at);
                if !record.dependencies.is_empty() {
                    let deps: Vec<String> =
                        record.dependencies.iter().map(ToString::to_string).collect();
                    let _ = writeln!(output, "   Depends on: {}", deps.join(", "));
                }
                output.push_str("\n   Attributes:\n");
                for (name, value) in &record.attributes {
                    let _ = writeln!(output, "     {name} = {value}");
                }
                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, _) => Self::json(&lock),
            (OutputFormat::Text, None) => String::from("State is not locked.\n"),
            (OutputFormat::Text, Some(lock)) => format!(
                "State locked by {} since {} (lock {}, {}s left)\n",
                lock.holder,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats an operation kind with color.
    fn format_kind(kind: OperationKind) -> String {
        let label = format!("{}{kind}", kind.symbol());
        match kind {
            OperationKind::Create => label.green().to_string(),
            OperationKind::Update => label.yellow().to_string(),
            OperationKind::Replace => label.magenta().to_string(),
            OperationKind::Destroy => label.red().to_string(),
            OperationKind::NoOp => label.dimmed().to_string(),
        }
    }

    /// Formats an operation status with color.
    fn format_status(status: OperationStatus) -> String {
        match status {
            OperationStatus::Success => "success".green().to_string(),
            OperationStatus::Failed => "failed".red().to_string(),
            OperationStatus::Skipped => "skipped".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
