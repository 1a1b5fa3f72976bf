//! qsub script generation.

use batchbridge_core::path::working_directory;
use batchbridge_core::{JobDescription, ScriptWriter, output_path};
use batchbridge_parsers::{format_walltime, shell_quote};
use camino::Utf8Path;

/// Job option appended verbatim as an extra `-l` resource request.
pub const RESOURCES: &str = "resources";

pub const DEFAULT_JOB_NAME: &str = "batchbridge";

const JOB_ID_TOKEN: &str = "$PBS_JOBID";

pub fn generate(desc: &JobDescription, entry: &Utf8Path) -> String {
    let mut script = ScriptWriter::new("#!/bin/sh", "#PBS");

    let name = desc.name.as_deref().unwrap_or(DEFAULT_JOB_NAME);
    script.directive(format!("-N {}", shell_quote(name)));

    if desc.working_directory.is_some() {
        let dir = working_directory(entry, desc.working_directory.as_deref());
        script.directive(format!("-d {}", shell_quote(dir.as_str())));
    }
    if let Some(queue) = &desc.queue {
        script.directive(format!("-q {queue}"));
    }

    script.directive(format!(
        "-l nodes={}:ppn={}",
        desc.node_count, desc.processes_per_node
    ));
    if let Some(minutes) = desc.max_runtime {
        script.directive(format!("-l walltime={}", format_walltime(minutes)));
    }
    if let Some(memory) = desc.max_memory {
        script.directive(format!("-l mem={memory}mb"));
    }
    if let Some(resources) = desc.job_options.get(RESOURCES) {
        script.directive(format!("-l {resources}"));
    }

    let stdout = desc.stdout.as_deref().unwrap_or("/dev/null");
    let stderr = desc.stderr.as_deref().unwrap_or("/dev/null");
    script
        .directive(format!("-o {}", output_path(stdout, JOB_ID_TOKEN)))
        .directive(format!("-e {}", output_path(stderr, JOB_ID_TOKEN)));

    // qsub has no stdin directive; redirect on the command line instead.
    script
        .scheduler_arguments(desc)
        .environment(desc)
        .invocation(desc, Some("pbsdsh"), desc.stdin.as_deref())
        .finish()
}
