//! Building blocks for submission scripts.
//!
//! Every dialect writes the same shape: a shebang, directive lines, exports,
//! a blank line and the invocation.

use batchbridge_parsers::shell_quote;
use std::fmt::Write;

use crate::types::{JOB_ID_PLACEHOLDER, JobDescription};

pub struct ScriptWriter {
    prefix: &'static str,
    text: String,
}

impl ScriptWriter {
    /// Start a script whose directives begin with `prefix` (`#SBATCH`,
    /// `#$`, `#PBS`).
    pub fn new(shebang: &str, prefix: &'static str) -> Self {
        let mut text = String::with_capacity(512);
        text.push_str(shebang);
        text.push('\n');
        Self { prefix, text }
    }

    pub fn directive(&mut self, value: impl AsRef<str>) -> &mut Self {
        let _ = writeln!(self.text, "{} {}", self.prefix, value.as_ref());
        self
    }

    /// One directive per scheduler argument, verbatim.
    pub fn scheduler_arguments(&mut self, desc: &JobDescription) -> &mut Self {
        for arg in &desc.scheduler_arguments {
            self.directive(arg);
        }
        self
    }

    /// `export` lines for the environment, in key order.
    pub fn environment(&mut self, desc: &JobDescription) -> &mut Self {
        for (key, value) in &desc.environment {
            let _ = writeln!(self.text, "export {}={}", key, shell_quote(value));
        }
        self
    }

    /// Blank separator, then the invocation line. `launcher` prefixes the
    /// command when the job needs several processes; `stdin` appends a shell
    /// redirect.
    pub fn invocation(
        &mut self,
        desc: &JobDescription,
        launcher: Option<&str>,
        stdin: Option<&str>,
    ) -> &mut Self {
        self.text.push('\n');
        if let Some(launcher) = launcher.filter(|_| desc.needs_launcher()) {
            self.text.push_str(launcher);
            self.text.push(' ');
        }
        self.text
            .push_str(&shell_quote(desc.executable.as_deref().unwrap_or_default()));
        for arg in &desc.arguments {
            self.text.push(' ');
            self.text.push_str(&shell_quote(arg));
        }
        if let Some(path) = stdin {
            self.text.push_str(" < ");
            self.text.push_str(&shell_quote(path));
        }
        self.text.push('\n');
        self
    }

    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}

/// Replace the job id placeholder in an output path with the dialect's own
/// job id token, then quote it.
pub fn output_path(path: &str, job_id_token: &str) -> String {
    shell_quote(&path.replace(JOB_ID_PLACEHOLDER, job_id_token))
}
