//! Partition (queue) information via sinfo.

use batchbridge_core::CommandLine;
use batchbridge_parsers::{ParseError, Records, parse_table};

/// sinfo output format:
/// %P - Partition (default partition marked with `*`)
/// %a - Availability
/// %l - Time limit
/// %F - Nodes allocated/idle/other/total
/// %N - Node list
/// %C - CPUs allocated/idle/other/total
/// %D - Node count
const SINFO_FORMAT: &str = "%P|%a|%l|%F|%N|%C|%D";

const PARTITION_FIELD: &str = "PARTITION";

pub fn command() -> CommandLine {
    CommandLine::new("sinfo").arg(format!("--format={SINFO_FORMAT}"))
}

/// Partition records keyed by name without the default marker.
pub fn parse(stdout: &str) -> Result<Records, ParseError> {
    Ok(parse_table(stdout, "|", PARTITION_FIELD)?
        .into_iter()
        .map(|(name, record)| (name.trim_end_matches('*').to_string(), record))
        .collect())
}

/// The partition sinfo marks with `*`.
pub fn default_partition(partitions: &Records) -> Option<String> {
    partitions
        .iter()
        .find(|(_, record)| {
            record
                .get(PARTITION_FIELD)
                .is_some_and(|raw| raw.ends_with('*'))
        })
        .map(|(name, _)| name.clone())
}
