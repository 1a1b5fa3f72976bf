//! sbatch script generation.

use batchbridge_core::path::working_directory;
use batchbridge_core::{JobDescription, ScriptWriter, output_path};
use batchbridge_parsers::shell_quote;
use camino::Utf8Path;

/// Job name used when the description has none.
pub const DEFAULT_JOB_NAME: &str = "batchbridge";

/// Slurm's job id token in output file names.
const JOB_ID_TOKEN: &str = "%j";

/// Build the sbatch script for `desc`.
pub fn generate(desc: &JobDescription, entry: &Utf8Path) -> String {
    let mut script = ScriptWriter::new("#!/bin/sh", "#SBATCH");

    let name = desc.name.as_deref().unwrap_or(DEFAULT_JOB_NAME);
    script.directive(format!("--job-name={}", shell_quote(name)));

    if desc.working_directory.is_some() {
        let dir = working_directory(entry, desc.working_directory.as_deref());
        script.directive(format!("--chdir={}", shell_quote(dir.as_str())));
    }
    if let Some(queue) = &desc.queue {
        script.directive(format!("--partition={queue}"));
    }

    script
        .directive(format!("--nodes={}", desc.node_count))
        .directive(format!("--ntasks-per-node={}", desc.processes_per_node));
    if let Some(threads) = desc.threads_per_process {
        script.directive(format!("--cpus-per-task={threads}"));
    }
    if let Some(minutes) = desc.max_runtime {
        script.directive(format!("--time={minutes}"));
    }
    if let Some(memory) = desc.max_memory {
        script.directive(format!("--mem={memory}M"));
    }

    if let Some(stdin) = &desc.stdin {
        script.directive(format!("--input={}", shell_quote(stdin)));
    }
    let stdout = desc.stdout.as_deref().unwrap_or("/dev/null");
    let stderr = desc.stderr.as_deref().unwrap_or("/dev/null");
    script
        .directive(format!("--output={}", output_path(stdout, JOB_ID_TOKEN)))
        .directive(format!("--error={}", output_path(stderr, JOB_ID_TOKEN)));

    script
        .scheduler_arguments(desc)
        .environment(desc)
        .invocation(desc, Some("srun"), None)
        .finish()
}
