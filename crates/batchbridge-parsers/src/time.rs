//! Exit code and duration helpers for scheduler output.

use crate::ParseError;

/// Parse an exit code, accepting both `N` and the Slurm `N:S` form.
///
/// Returns the exit code portion. A missing value is `Ok(None)`; a
/// non-numeric value is a parse error.
pub fn parse_exit_code(s: Option<&str>) -> Result<Option<i32>, ParseError> {
    let Some(raw) = s else {
        return Ok(None);
    };
    let code = raw.trim().split(':').next().unwrap_or_default();
    code.parse()
        .map(Some)
        .map_err(|_| ParseError::new("exit code is not numeric", raw))
}

/// Extract the signal from an `N:S` exit code, if it is present and non-zero.
pub fn parse_exit_signal(s: &str) -> Option<i32> {
    s.trim()
        .split(':')
        .nth(1)
        .and_then(|v| v.parse().ok())
        .filter(|&signal| signal != 0)
}

/// Format a runtime in minutes as `HH:MM:SS` (hours may exceed 24).
pub fn format_walltime(minutes: u32) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}
