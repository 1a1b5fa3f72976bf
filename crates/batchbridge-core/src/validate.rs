//! Structural validation of job descriptions before anything is submitted.

use crate::error::{Result, SchedulerError};
use crate::types::{CUSTOM_SCRIPT_OPTION, JobDescription};

/// What a dialect accepts.
#[derive(Debug, Clone, Copy)]
pub struct Rules<'a> {
    pub scheduler: &'static str,
    /// Job option keys the dialect understands, besides the custom script.
    pub job_options: &'a [&'a str],
    /// Whether a missing max runtime falls back to a scheduler default.
    pub has_default_runtime: bool,
    pub interactive_allowed: bool,
}

/// Check `desc` against the shared rules, then the dialect's `extra` rules.
///
/// A custom script skips the structural checks and the extra rules, but is
/// still checked for conflicts with interactive mode.
pub fn verify<F>(desc: &JobDescription, rules: &Rules<'_>, extra: F) -> Result<()>
where
    F: FnOnce(&JobDescription) -> std::result::Result<(), String>,
{
    let invalid = |reason: String| SchedulerError::invalid(rules.scheduler, reason);

    if desc.custom_script().is_some() {
        return check_interactive(desc, rules).map_err(invalid);
    }

    if let Some(key) = desc
        .job_options
        .keys()
        .find(|key| {
            key.as_str() != CUSTOM_SCRIPT_OPTION
                && !rules.job_options.iter().any(|k| *k == key.as_str())
        })
    {
        return Err(invalid(format!("unsupported job option: {key}")));
    }

    match desc.executable.as_deref() {
        Some(exe) if !exe.trim().is_empty() => {}
        _ => return Err(invalid("executable missing".to_string())),
    }

    if desc.node_count < 1 {
        return Err(invalid(format!("illegal node count: {}", desc.node_count)));
    }
    if desc.processes_per_node < 1 {
        return Err(invalid(format!(
            "illegal processes per node: {}",
            desc.processes_per_node
        )));
    }
    match desc.max_runtime {
        Some(0) => return Err(invalid("illegal maximum runtime: 0".to_string())),
        None if !rules.has_default_runtime => {
            return Err(invalid("maximum runtime must be set".to_string()));
        }
        _ => {}
    }

    check_interactive(desc, rules).map_err(invalid)?;
    extra(desc).map_err(invalid)
}

fn check_interactive(desc: &JobDescription, rules: &Rules<'_>) -> std::result::Result<(), String> {
    if !desc.interactive {
        return Ok(());
    }
    if !rules.interactive_allowed {
        return Err("interactive jobs are not supported".to_string());
    }
    if desc.custom_script().is_some() {
        return Err("custom script cannot be used with interactive jobs".to_string());
    }
    if desc.start_single_process {
        return Err("start single process cannot be used with interactive jobs".to_string());
    }
    if desc.stdin.is_some() {
        return Err("stdin cannot be redirected for interactive jobs".to_string());
    }
    if desc.stdout.is_some() || desc.stderr.is_some() {
        return Err("stdout and stderr cannot be redirected for interactive jobs".to_string());
    }
    Ok(())
}
