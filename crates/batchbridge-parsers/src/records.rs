//! Line-oriented record parsing.
//!
//! Scheduler tools print three recurring shapes:
//! - key/value lines (`scontrol show config`, `qmgr`)
//! - tables with a header line (`squeue`, `sacct`, `sinfo`)
//! - key/value blocks where a designated key starts a new record (`qacct -j`,
//!   `qstat -Q -f`)

use crate::{ParseError, split_delimited};
use std::collections::BTreeMap;

/// One parsed record: field name to raw value.
pub type Record = BTreeMap<String, String>;

/// Records indexed by their key field (usually the job or queue identifier).
pub type Records = BTreeMap<String, Record>;

/// How a line is split into key and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator<'a> {
    /// Split at the first occurrence of the token; both sides are trimmed.
    Token(&'a str),
    /// Split at the first run of whitespace.
    Whitespace,
}

impl Separator<'_> {
    fn split<'l>(&self, line: &'l str) -> Option<(&'l str, &'l str)> {
        match self {
            Separator::Token(token) => line
                .split_once(token)
                .map(|(key, value)| (key.trim(), value.trim())),
            Separator::Whitespace => {
                let line = line.trim();
                let idx = line.find(char::is_whitespace)?;
                Some((&line[..idx], line[idx..].trim()))
            }
        }
    }
}

fn is_ignorable(line: &str, ignore: &[&str]) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || ignore.iter().any(|prefix| trimmed.starts_with(prefix))
}

fn split_line<'l>(line: &'l str, separator: Separator<'_>) -> Result<(&'l str, &'l str), ParseError> {
    match separator.split(line) {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        Some(_) => Err(ParseError::new("empty key", line)),
        None => Err(ParseError::new("line has no key/value separator", line)),
    }
}

/// Parse `KEY<sep>VALUE` lines into a single record.
///
/// Blank lines and lines starting with one of the `ignore` prefixes are
/// skipped. Any other line without the separator is an error.
pub fn parse_key_values(
    text: &str,
    separator: Separator<'_>,
    ignore: &[&str],
) -> Result<Record, ParseError> {
    let mut record = Record::new();
    for line in text.lines() {
        if is_ignorable(line, ignore) {
            continue;
        }
        let (key, value) = split_line(line, separator)?;
        record.insert(key.to_string(), value.to_string());
    }
    Ok(record)
}

/// Parse a table whose first non-blank line names the fields.
///
/// Every row must have exactly as many fields as the header. Rows are indexed
/// by `key_field`, which must be present in the header and unique per row.
pub fn parse_table(text: &str, separator: &str, key_field: &str) -> Result<Records, ParseError> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return Ok(Records::new());
    };
    let header: Vec<&str> = header_line.split(separator).map(str::trim).collect();
    let key_index = header
        .iter()
        .position(|field| *field == key_field)
        .ok_or_else(|| ParseError::new(format!("header lacks key field {key_field}"), header_line))?;

    let mut records = Records::new();
    for line in lines {
        let fields = split_delimited(line, separator, header.len())?;
        let key = fields[key_index];
        if key.is_empty() {
            return Err(ParseError::new(format!("empty {key_field}"), line));
        }
        let record: Record = header
            .iter()
            .zip(&fields)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        if records.insert(key.to_string(), record).is_some() {
            return Err(ParseError::new(format!("duplicate {key_field} {key}"), line));
        }
    }
    Ok(records)
}

/// Parse key/value lines into consecutive records.
///
/// A new record starts whenever `boundary_key` appears while the current
/// record already holds a value for it.
pub fn parse_keyed_blocks(
    text: &str,
    separator: Separator<'_>,
    boundary_key: &str,
    ignore: &[&str],
) -> Result<Vec<Record>, ParseError> {
    let mut blocks = Vec::new();
    let mut current = Record::new();

    for line in text.lines() {
        if is_ignorable(line, ignore) {
            continue;
        }
        let (key, value) = split_line(line, separator)?;
        if key == boundary_key && current.contains_key(boundary_key) {
            blocks.push(std::mem::take(&mut current));
        }
        current.insert(key.to_string(), value.to_string());
    }

    if !current.is_empty() {
        blocks.push(current);
    }
    Ok(blocks)
}

/// Index records by `key_field`. Later records replace earlier ones.
pub fn index_records(blocks: Vec<Record>, key_field: &str) -> Result<Records, ParseError> {
    let mut records = Records::new();
    for block in blocks {
        let key = block
            .get(key_field)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| {
                let fragment = block
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                ParseError::new(format!("record without {key_field}"), fragment)
            })?;
        records.insert(key, block);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_values() {
        let text = "Configuration data as of 2024-01-15T10:00:00\n\
                    AccountingStorageType   = accounting_storage/slurmdbd\n\
                    \n\
                    SLURM_VERSION           = 23.02.7\n";
        let record =
            parse_key_values(text, Separator::Token("="), &["Configuration data"]).unwrap();
        assert_eq!(record["SLURM_VERSION"], "23.02.7");
        assert_eq!(
            record["AccountingStorageType"],
            "accounting_storage/slurmdbd"
        );
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_parse_key_values_rejects_line_without_separator() {
        let err = parse_key_values("a = 1\ngarbage\n", Separator::Token("="), &[]).unwrap_err();
        assert_eq!(err.fragment, "garbage");
    }

    #[test]
    fn test_parse_key_values_whitespace() {
        let record = parse_key_values("qname   all.q\nslots 4\n", Separator::Whitespace, &[])
            .unwrap();
        assert_eq!(record["qname"], "all.q");
        assert_eq!(record["slots"], "4");
    }

    #[test]
    fn test_parse_table() {
        let text = "JOBID|STATE|PARTITION\n12|RUNNING|short\n13|PENDING|long\n";
        let records = parse_table(text, "|", "JOBID").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["12"]["STATE"], "RUNNING");
        assert_eq!(records["13"]["PARTITION"], "long");
    }

    #[test]
    fn test_parse_table_header_only() {
        let records = parse_table("JOBID|STATE\n", "|", "JOBID").unwrap();
        assert!(records.is_empty());
        assert!(parse_table("", "|", "JOBID").unwrap().is_empty());
    }

    #[test]
    fn test_parse_table_rejects_short_row() {
        let err = parse_table("JOBID|STATE\n12\n", "|", "JOBID").unwrap_err();
        assert_eq!(err.fragment, "12");
    }

    #[test]
    fn test_parse_table_rejects_missing_key_field() {
        let err = parse_table("ID|STATE\n12|R\n", "|", "JOBID").unwrap_err();
        assert!(err.message.contains("JOBID"));
    }

    #[test]
    fn test_parse_table_rejects_duplicates() {
        assert!(parse_table("JOBID|STATE\n1|R\n1|PD\n", "|", "JOBID").is_err());
    }

    #[test]
    fn test_parse_keyed_blocks() {
        let text = "==========\n\
                    qname        all.q\n\
                    jobnumber    7\n\
                    failed       0\n\
                    ==========\n\
                    qname        all.q\n\
                    jobnumber    8\n\
                    failed       100 : assumedly after job\n";
        let blocks = parse_keyed_blocks(text, Separator::Whitespace, "qname", &["==="]).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["failed"], "100 : assumedly after job");

        let records = index_records(blocks, "jobnumber").unwrap();
        assert_eq!(records["7"]["failed"], "0");
        assert!(records.contains_key("8"));
    }

    #[test]
    fn test_index_records_requires_key() {
        let blocks = vec![Record::from([("qname".to_string(), "all.q".to_string())])];
        let err = index_records(blocks, "jobnumber").unwrap_err();
        assert!(err.message.contains("jobnumber"));
    }
}
