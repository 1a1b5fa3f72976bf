//! Quoting and list rendering for generated command lines and scripts.

/// Quote a single argument for a POSIX shell.
///
/// The argument is wrapped in single quotes; embedded single quotes are
/// closed, escaped and reopened.
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Join identifiers with commas, skipping missing entries.
pub fn join_ids<I, S>(ids: I) -> String
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    ids.into_iter()
        .flatten()
        .map(|id| id.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
