//! CLI output formatting

use crate::{
    core::{ExecutionStatus, StepState},
    execution::ExecutionEvent,
    runtime::ContainerLogs,
    service::ServiceEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "# ");

/// Spinner shown while a step runs
pub fn create_step_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Fetched => style("FETCHED").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { .. } => style("COMPLETED").green().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an execution event for display
///
/// Returns `None` for events that are only shown through other means.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted { run_id, kind } => format!(
            "{} Starting {} {}",
            ROCKET,
            style(kind).bold(),
            style(run_id).dim()
        ),
        ExecutionEvent::StepsFetched { count } => {
            format!("{} Fetched {} steps", INFO, style(count).cyan())
        }
        ExecutionEvent::GuestStarted {
            container_id,
            image,
        } => format!(
            "{} Guest {} running {}",
            INFO,
            style(short_id(container_id)).dim(),
            style(image).bold()
        ),
        ExecutionEvent::Service(event) => return format_service_event(event),
        ExecutionEvent::StepStarted { .. } => return None,
        ExecutionEvent::StepCompleted { name, .. } => {
            format!("{} {}", CHECK, style(name).green())
        }
        ExecutionEvent::StepFailed { name, error, .. } => {
            format!("{} {}: {}", CROSS, style(name).red(), style(error).dim())
        }
        ExecutionEvent::ArtifactCollected { artifact, stored } => format!(
            "{} Collected {} ({} files stored)",
            PACKAGE,
            style(artifact.host_path.display()).cyan(),
            stored.len()
        ),
        ExecutionEvent::PipelineCompleted { run_id, status } => format!(
            "{} Run {} {}",
            INFO,
            style(run_id).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// Format a service report, including captured logs for failures
pub fn format_service_event(event: &ServiceEvent) -> Option<String> {
    let line = match event {
        ServiceEvent::Started {
            service,
            container_id,
        } => format!(
            "{} Service {} started ({})",
            INFO,
            style(service).bold(),
            style(short_id(container_id)).dim()
        ),
        ServiceEvent::Completed { service, .. } => {
            format!("{} Service {} exited", INFO, style(service).bold())
        }
        ServiceEvent::Failed {
            service, status, ..
        } => format!(
            "{} Service {} exited with status {}",
            WARN,
            style(service).red(),
            style(status).red()
        ),
        ServiceEvent::WaitFailed { service, error, .. } => format!(
            "{} Lost track of service {}: {}",
            WARN,
            style(service).red(),
            style(error).dim()
        ),
        ServiceEvent::LogsUnavailable {
            service,
            status,
            error,
            ..
        } => format!(
            "{} Service {} exited with status {}, logs unavailable: {}",
            WARN,
            style(service).red(),
            status,
            style(error).dim()
        ),
        ServiceEvent::Detached { .. } => return None,
    };
    Some(line)
}

/// Write the captured logs of a failed service to the matching streams, in full
pub fn print_service_logs(logs: &ContainerLogs) {
    if let Some(block) = service_log_block(&logs.stdout) {
        println!("{}", block);
    }
    if let Some(block) = service_log_block(&logs.stderr) {
        eprintln!("{}", block);
    }
}

/// One stream of service output, without trailing blank lines
pub fn service_log_block(output: &str) -> Option<&str> {
    let trimmed = output.trim_end();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_logs_are_not_truncated() {
        let output = (1..=100)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n")
            + "\n\n";
        let block = service_log_block(&output).unwrap();
        assert!(block.starts_with("line 1\n"));
        assert!(block.ends_with("line 100"));
        assert_eq!(block.lines().count(), 100);

        assert_eq!(service_log_block("a\nb\n"), Some("a\nb"));
        assert_eq!(service_log_block("\n  \n"), None);
    }

    #[test]
    fn test_failed_service_reports_status() {
        let event = ServiceEvent::Failed {
            service: "redis".to_string(),
            container_id: "abc".to_string(),
            status: 7,
            logs: ContainerLogs {
                stdout: "ready".to_string(),
                stderr: "oom".to_string(),
            },
        };
        let line = format_service_event(&event).unwrap();
        assert!(line.contains("redis"));
        assert!(line.contains('7'));
        assert!(!line.contains("oom"));
    }

    #[test]
    fn test_detached_is_silent() {
        let event = ServiceEvent::Detached {
            service: "redis".to_string(),
            container_id: "abc".to_string(),
        };
        assert!(format_service_event(&event).is_none());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }
}
