//! qsub script generation.

use batchbridge_core::path::working_directory;
use batchbridge_core::{JobDescription, ScriptWriter, output_path};
use batchbridge_parsers::{format_walltime, shell_quote};
use camino::Utf8Path;

/// Job option naming the parallel environment for multi-slot jobs.
pub const PARALLEL_ENVIRONMENT: &str = "parallel.environment";

/// Job option overriding the slot count requested from the parallel
/// environment.
pub const PARALLEL_SLOTS: &str = "parallel.slots";

pub const DEFAULT_JOB_NAME: &str = "batchbridge";

const JOB_ID_TOKEN: &str = "$JOB_ID";

/// Slots requested for `desc`: the explicit option, else one per process.
pub fn slots(desc: &JobDescription) -> Result<u32, String> {
    match desc.job_options.get(PARALLEL_SLOTS) {
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(format!("{PARALLEL_SLOTS} must be a positive integer, got {raw:?}")),
        },
        None => Ok(desc.total_processes()),
    }
}

pub fn generate(desc: &JobDescription, entry: &Utf8Path) -> String {
    let mut script = ScriptWriter::new("#!/bin/sh", "#$");
    script.directive("-S /bin/sh");

    let name = desc.name.as_deref().unwrap_or(DEFAULT_JOB_NAME);
    script.directive(format!("-N {}", shell_quote(name)));

    if desc.working_directory.is_some() {
        let dir = working_directory(entry, desc.working_directory.as_deref());
        script.directive(format!("-wd {}", shell_quote(dir.as_str())));
    }
    if let Some(queue) = &desc.queue {
        script.directive(format!("-q {queue}"));
    }
    if let Some(pe) = desc.job_options.get(PARALLEL_ENVIRONMENT) {
        // Validation has rejected unparsable slot counts by now.
        let slots = slots(desc).unwrap_or_else(|_| desc.total_processes());
        script.directive(format!("-pe {pe} {slots}"));
    }
    if let Some(minutes) = desc.max_runtime {
        script.directive(format!("-l h_rt={}", format_walltime(minutes)));
    }
    if let Some(memory) = desc.max_memory {
        script.directive(format!("-l h_vmem={memory}M"));
    }

    if let Some(stdin) = &desc.stdin {
        script.directive(format!("-i {}", shell_quote(stdin)));
    }
    let stdout = desc.stdout.as_deref().unwrap_or("/dev/null");
    let stderr = desc.stderr.as_deref().unwrap_or("/dev/null");
    script
        .directive(format!("-o {}", output_path(stdout, JOB_ID_TOKEN)))
        .directive(format!("-e {}", output_path(stderr, JOB_ID_TOKEN)));

    script
        .scheduler_arguments(desc)
        .environment(desc)
        .invocation(desc, Some("mpirun -np $NSLOTS"), None)
        .finish()
}
