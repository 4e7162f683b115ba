//! Reduction of raw queue state into fixed category counts.
//!
//! The taxonomy is closed: HOLD, WAIT, TIMER and EXEC. Records whose `queue`
//! value is anything else (or that cannot be read at all) land in the
//! ignored bucket and never fail the cycle.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::config::ResponseFormat;

/// One of the fixed queue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueCategory {
    Hold,
    Wait,
    Timer,
    Exec,
}

impl QueueCategory {
    /// All categories, in exposition order.
    pub const ALL: [QueueCategory; 4] = [
        QueueCategory::Hold,
        QueueCategory::Wait,
        QueueCategory::Timer,
        QueueCategory::Exec,
    ];

    /// Upstream label, matched case-sensitively.
    pub fn label(self) -> &'static str {
        match self {
            QueueCategory::Hold => "HOLD",
            QueueCategory::Wait => "WAIT",
            QueueCategory::Timer => "TIMER",
            QueueCategory::Exec => "EXEC",
        }
    }

    /// Maps an upstream `queue` value onto the taxonomy.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One unit of work reported by the upstream queue query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueRecord {
    pub queue: Option<String>,
    /// `processName`, or its older spelling `pname`.
    pub process_name: Option<String>,
}

impl QueueRecord {
    /// Reads a record from an arbitrary JSON element.
    ///
    /// Each field is read on its own: a field that is missing or not a
    /// string is `None` without affecting the others. Anything that is not
    /// an object yields an empty record, which classifies as ignored.
    pub fn from_value(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            queue: text("queue"),
            process_name: text("processName").or_else(|| text("pname")),
        }
    }

    pub fn category(&self) -> Option<QueueCategory> {
        self.queue.as_deref().and_then(QueueCategory::from_label)
    }
}

/// Count per category; every category always has an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryCounts {
    counts: [u64; 4],
}

impl CategoryCounts {
    pub fn get(&self, category: QueueCategory) -> u64 {
        self.counts[category.index()]
    }

    pub fn set(&mut self, category: QueueCategory, value: u64) {
        self.counts[category.index()] = value;
    }

    fn increment(&mut self, category: QueueCategory) {
        self.counts[category.index()] += 1;
    }

    /// Iterates all four categories in exposition order.
    pub fn iter(&self) -> impl Iterator<Item = (QueueCategory, u64)> + '_ {
        QueueCategory::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl FromIterator<(QueueCategory, u64)> for CategoryCounts {
    fn from_iter<I: IntoIterator<Item = (QueueCategory, u64)>>(iter: I) -> Self {
        let mut counts = Self::default();
        for (category, value) in iter {
            counts.set(category, value);
        }
        counts
    }
}

/// Result of classifying one poll cycle's payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub counts: CategoryCounts,
    /// Records that matched no category.
    pub ignored: u64,
    /// HOLD/WAIT records per process name.
    pub process_counts: BTreeMap<String, u64>,
}

/// Error type for payloads that cannot be classified at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// JSON format configured but the body is not a JSON array.
    MalformedPayload(String),
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifyError::MalformedPayload(msg) => write!(f, "malformed queue payload: {}", msg),
        }
    }
}

impl std::error::Error for ClassifyError {}

/// Single pass over typed records.
pub fn classify_records(records: &[QueueRecord]) -> Classification {
    let mut result = Classification::default();

    for record in records {
        let Some(category) = record.category() else {
            result.ignored += 1;
            continue;
        };
        result.counts.increment(category);

        if matches!(category, QueueCategory::Hold | QueueCategory::Wait)
            && let Some(name) = record.process_name.as_deref()
            && !name.is_empty()
        {
            *result.process_counts.entry(name.to_string()).or_default() += 1;
        }
    }

    result
}

/// Counts non-overlapping, case-sensitive occurrences of each label.
pub fn classify_text(output: &str) -> Classification {
    let counts = QueueCategory::ALL
        .into_iter()
        .map(|c| (c, output.matches(c.label()).count() as u64))
        .collect();

    Classification {
        counts,
        ..Classification::default()
    }
}

/// Parses a JSON array body into records.
///
/// Only a body that is not a JSON array is an error; each element is read
/// leniently via [`QueueRecord::from_value`].
pub fn parse_records(body: &str) -> Result<Vec<QueueRecord>, ClassifyError> {
    let elements: Vec<Value> =
        serde_json::from_str(body).map_err(|e| ClassifyError::MalformedPayload(e.to_string()))?;
    Ok(elements.into_iter().map(QueueRecord::from_value).collect())
}

/// Classifies a raw query body according to the configured format.
pub fn classify_payload(
    format: ResponseFormat,
    body: &str,
) -> Result<Classification, ClassifyError> {
    match format {
        ResponseFormat::Json => parse_records(body).map(|records| classify_records(&records)),
        ResponseFormat::Text => Ok(classify_text(body)),
    }
}
