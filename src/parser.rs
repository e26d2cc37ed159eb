/// Diagnostics block parsing: scrape `label: value` pairs out of the
/// free-text diagnostics the database client reports for each page.
///
/// The format has no grammar we can rely on, so the parser is best effort.
/// Lines no rule recognizes are skipped and nothing here returns an error.
use crate::format::{DiagnosticsFormat, ExtractionRule};
use std::collections::BTreeMap;

/// Flat metric name to value mapping. Sorted keys keep serialization stable.
pub type DiagnosticsMap = BTreeMap<String, String>;

/// Parse one diagnostics block into a fresh map.
#[cfg(test)]
pub fn parse_block(block: &str, format: &DiagnosticsFormat) -> DiagnosticsMap {
    let mut map = DiagnosticsMap::new();
    parse_into(block, format, &mut map);
    map
}

/// Parse one diagnostics block, inserting into `map`.
///
/// Every rule runs on every line in rule order; a later line (or a later
/// rule on the same line) overwrites an earlier entry with the same key.
pub fn parse_into(block: &str, format: &DiagnosticsFormat, map: &mut DiagnosticsMap) {
    for line in block.split(format.line_separator()) {
        for rule in format.rules() {
            if let Some((key, value)) = apply_rule(rule, line) {
                map.insert(key, value);
            }
        }
    }
}

fn apply_rule(rule: &ExtractionRule, line: &str) -> Option<(String, String)> {
    match rule {
        ExtractionRule::ColonSplit { label, value } => {
            let label = label.find(line)?;
            let value = value.find(line)?;
            Some((strip(label.as_str()), strip(value.as_str())))
        }
        ExtractionRule::FixedOffset {
            trigger,
            anchor,
            offset,
            key,
        } => {
            if !trigger.is_match(line) {
                return None;
            }
            let value = value_at_offset(line, anchor, *offset);
            if value.is_none() {
                tracing::debug!(
                    line,
                    anchor = %anchor,
                    offset,
                    "fixed-offset rule matched but value is out of range"
                );
            }
            value.map(|v| (key.clone(), v.to_string()))
        }
    }
}

/// Raw text starting `offset` characters past the start of `anchor`.
fn value_at_offset<'a>(line: &'a str, anchor: &str, offset: usize) -> Option<&'a str> {
    let start = line.find(anchor)?;
    let tail = &line[start..];
    match tail.char_indices().nth(offset) {
        Some((i, _)) => Some(&tail[i..]),
        None if tail.chars().count() == offset => Some(""),
        None => None,
    }
}

/// Remove every colon and whitespace character.
fn strip(s: &str) -> String {
    s.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect()
}

/// Query metrics block as reported by the 4.x SDK for one page.
#[cfg(test)]
pub(crate) const SAMPLE_DIAGNOSTICS: &str = "userAgent=azsdk-java-cosmos/4.28.0 MacOSX/11.3 JRE/11.0.12
 Retrieved Document Count                 :               9
 Retrieved Document Size                  :            3763 bytes
 Output Document Count                    :               9
 Output Document Size                     :            3820 bytes
 Index Utilization                        :          100.00 %
 Total Query Execution Time               :        0.190000 milliseconds
 Query Preparation Times Query Compilation Time : 0.030000 milliseconds
 Logical Plan Build Time : 0.000000 milliseconds
 Physical Plan Build Time : 0.000000 milliseconds
 Query Optimization Time : 0.000000 milliseconds
 Index Lookup Time : 0.000000 milliseconds
 Document Load Time : 0.030000 milliseconds
 Runtime Execution Times Query Engine Times : 0.010000 milliseconds
 Request Charge : 2.43 RUs";
