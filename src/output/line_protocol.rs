//! Influx line protocol encoding.
//!
//! `measurement[,tag=val,...] field=val[,field=val...][ timestamp]`
//!
//! Tags and fields keep the order they were supplied in. Nothing is escaped:
//! names and values must not contain spaces, commas or `=`. Values are written
//! with their `Display` form and carry no type suffix, so the receiving end
//! infers every field as a float.

use std::fmt::{self, Display, Write};

/// Insertion-ordered key/value pairs used for both tags and fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    pairs: Vec<(String, String)>,
}

pub type Tags = KeyValues;
pub type Fields = KeyValues;

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Display) {
        self.pairs.push((key.into(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for KeyValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = KeyValues::new();
        for (key, value) in iter {
            set.push(key, value);
        }
        set
    }
}

impl Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_char(',')?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Value of one entry in a grouped field set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupedValue {
    /// One line per inner tag (`"line=A"`), appended to the base tags.
    PerTag(Vec<(String, String)>),
    /// Exactly one line, optionally with its own timestamp.
    Scalar { value: String, timestamp: Option<u64> },
}

/// Field name to [`GroupedValue`], in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedFields {
    entries: Vec<(String, GroupedValue)>,
}

impl GroupedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, field: impl Into<String>, value: impl Display) -> Self {
        self.entries.push((
            field.into(),
            GroupedValue::Scalar {
                value: value.to_string(),
                timestamp: None,
            },
        ));
        self
    }

    pub fn scalar_at(mut self, field: impl Into<String>, value: impl Display, timestamp: u64) -> Self {
        self.entries.push((
            field.into(),
            GroupedValue::Scalar {
                value: value.to_string(),
                timestamp: Some(timestamp),
            },
        ));
        self
    }

    pub fn per_tag<I, T, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (T, V)>,
        T: Into<String>,
        V: Display,
    {
        let values = values
            .into_iter()
            .map(|(tag, value)| (tag.into(), value.to_string()))
            .collect();
        self.entries.push((field.into(), GroupedValue::PerTag(values)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of lines [`build_lines_multi`] will emit.
    pub fn line_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, value)| match value {
                GroupedValue::PerTag(values) => values.len(),
                GroupedValue::Scalar { .. } => 1,
            })
            .sum()
    }
}

fn write_line(
    line: &mut String,
    measurement: &str,
    tags: &Tags,
    extra_tag: Option<&str>,
    fields: impl Display,
    timestamp: Option<u64>,
) {
    line.push_str(measurement);
    if !tags.is_empty() {
        let _ = write!(line, ",{}", tags);
    }
    if let Some(extra) = extra_tag {
        let _ = write!(line, ",{}", extra);
    }
    let _ = write!(line, " {}", fields);
    if let Some(ts) = timestamp {
        let _ = write!(line, " {}", ts);
    }
}

/// One line protocol record. `timestamp` is Unix nanoseconds; when absent the
/// server assigns its receive time.
pub fn build_line(measurement: &str, tags: &Tags, fields: &Fields, timestamp: Option<u64>) -> String {
    let mut line = String::new();
    write_line(&mut line, measurement, tags, None, fields, timestamp);
    line
}

/// Expands grouped fields into one record per sub-series so related series
/// (e.g. per-phase voltage) share a single batched request.
pub fn build_lines_multi(measurement: &str, tags: &Tags, grouped: &GroupedFields) -> Vec<String> {
    let mut lines = Vec::with_capacity(grouped.line_count());
    for (field, value) in &grouped.entries {
        match value {
            GroupedValue::PerTag(values) => {
                for (inner_tag, inner_value) in values {
                    let mut line = String::new();
                    write_line(
                        &mut line,
                        measurement,
                        tags,
                        Some(inner_tag),
                        format_args!("{}={}", field, inner_value),
                        None,
                    );
                    lines.push(line);
                }
            }
            GroupedValue::Scalar { value, timestamp } => {
                let mut line = String::new();
                write_line(
                    &mut line,
                    measurement,
                    tags,
                    None,
                    format_args!("{}={}", field, value),
                    *timestamp,
                );
                lines.push(line);
            }
        }
    }
    lines
}

/// Request body for a batch of records.
pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n")
}
