/// Diagnostics format profiles: the ordered extraction rules applied to
/// each line of a diagnostics block.
///
/// The database client emits diagnostics as loosely structured text whose
/// layout changes between SDK releases. Each layout is a `FormatVersion`
/// with its own rule set, so format drift is handled by selecting or
/// tuning a profile rather than editing the parser.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static LABEL_BEFORE_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z].*?:").unwrap());
static VALUE_AFTER_COLON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(.*)").unwrap());
// Whitespace inside the phrase is optional: the vendor layout spells it out
// with spaces, compact captures run the words together.
static RETRIEVED_COUNT_TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Retrieved\s*Document\s*Count\s*:").unwrap());

/// Phrase the fixed-offset rule measures from.
pub const RETRIEVED_COUNT_ANCHOR: &str = "Retrieved Document Count";
/// Key the fixed-offset rule stores under.
pub const RETRIEVED_COUNT_KEY: &str = "RetrievedDocumentCount";
/// Column offset of the value from the anchor in the 4.x layout.
pub const V4_RETRIEVED_COUNT_OFFSET: usize = 57;

/// Known diagnostics layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Query metrics block of the 4.x client SDK (fixed-width labels).
    #[default]
    V4,
}

/// A single extraction rule. All rules run on every line.
#[derive(Debug, Clone)]
pub enum ExtractionRule {
    /// `label: value` split on the first colon; colons and whitespace are
    /// stripped from both halves.
    ColonSplit { label: Regex, value: Regex },
    /// When `trigger` matches, take the raw line from `offset` characters
    /// past the start of `anchor` and store it under `key`.
    FixedOffset {
        trigger: Regex,
        anchor: String,
        offset: usize,
        key: String,
    },
}

/// An ordered rule set tied to a declared format version.
#[derive(Debug, Clone)]
pub struct DiagnosticsFormat {
    version: FormatVersion,
    line_separator: String,
    rules: Vec<ExtractionRule>,
}

impl DiagnosticsFormat {
    /// Built-in profile for the given version.
    pub fn for_version(version: FormatVersion) -> Self {
        match version {
            FormatVersion::V4 => Self {
                version,
                line_separator: "\n".to_string(),
                rules: vec![
                    ExtractionRule::ColonSplit {
                        label: LABEL_BEFORE_COLON.clone(),
                        value: VALUE_AFTER_COLON.clone(),
                    },
                    ExtractionRule::FixedOffset {
                        trigger: RETRIEVED_COUNT_TRIGGER.clone(),
                        anchor: RETRIEVED_COUNT_ANCHOR.to_string(),
                        offset: V4_RETRIEVED_COUNT_OFFSET,
                        key: RETRIEVED_COUNT_KEY.to_string(),
                    },
                ],
            },
        }
    }

    /// Use a different line separator (e.g. `"\r\n"` for captures taken on Windows).
    pub fn with_line_separator(mut self, separator: impl Into<String>) -> Self {
        self.line_separator = separator.into();
        self
    }

    /// Override the offset of every fixed-offset rule in this profile.
    pub fn with_fixed_offset(mut self, new_offset: usize) -> Self {
        for rule in &mut self.rules {
            if let ExtractionRule::FixedOffset { offset, .. } = rule {
                *offset = new_offset;
            }
        }
        self
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn line_separator(&self) -> &str {
        &self.line_separator
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }
}

impl Default for DiagnosticsFormat {
    fn default() -> Self {
        Self::for_version(FormatVersion::default())
    }
}
