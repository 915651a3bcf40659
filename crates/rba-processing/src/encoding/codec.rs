use crate::error::{PipelineError, Result};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Code of a category never observed by a frozen codec.
pub const UNKNOWN_CODE: i64 = -1;

/// Exported codec: for each column the observed values in code order.
///
/// The code of a value is its position in the list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecState {
    pub columns: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ColumnCodes {
    codes: HashMap<String, i64>,
    values: Vec<String>,
}

impl ColumnCodes {
    fn observe(&mut self, value: &str) -> i64 {
        if let Some(&code) = self.codes.get(value) {
            return code;
        }
        let code = self.values.len() as i64;
        self.codes.insert(value.to_string(), code);
        self.values.push(value.to_string());
        code
    }
}

/// Per-column mapping from raw category to a dense 0-based code.
///
/// Fitting uses [`observe`](Self::observe)/[`encode`](Self::encode), which
/// assign the next code to an unseen value. Applying an imported mapping uses
/// [`lookup`](Self::lookup)/[`apply`](Self::apply), which never assign and map
/// unseen values to [`UNKNOWN_CODE`].
///
/// # Example
///
/// ```rust,ignore
/// let mut codec = CategoryCodec::new();
/// assert_eq!(codec.observe("Country", "US"), 0);
/// assert_eq!(codec.observe("Country", "FR"), 1);
/// assert_eq!(codec.observe("Country", "US"), 0);
/// assert_eq!(codec.lookup("Country", "DE"), UNKNOWN_CODE);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CodecState")]
pub struct CategoryCodec {
    columns: BTreeMap<String, ColumnCodes>,
}

impl CategoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with an (empty) code table for each column.
    pub fn with_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut codec = Self::new();
        for column in columns {
            codec.columns.entry(column.to_string()).or_default();
        }
        codec
    }

    /// Return the code of `value`, assigning the next free code on first sight.
    pub fn observe(&mut self, column: &str, value: &str) -> i64 {
        match self.columns.get_mut(column) {
            Some(codes) => codes.observe(value),
            None => self
                .columns
                .entry(column.to_string())
                .or_default()
                .observe(value),
        }
    }

    /// Observe every value of a column slice, in order.
    pub fn encode<S: AsRef<str>>(&mut self, column: &str, values: &[S]) -> Vec<i64> {
        values
            .iter()
            .map(|value| self.observe(column, value.as_ref()))
            .collect()
    }

    /// Return the stored code of `value` without assigning a new one.
    pub fn lookup(&self, column: &str, value: &str) -> i64 {
        self.columns
            .get(column)
            .and_then(|codes| codes.codes.get(value))
            .copied()
            .unwrap_or(UNKNOWN_CODE)
    }

    /// Look up every value of a column slice.
    ///
    /// Returns the codes and the number of values mapped to [`UNKNOWN_CODE`].
    pub fn apply<S: AsRef<str>>(&self, column: &str, values: &[S]) -> (Vec<i64>, u64) {
        let mut unknown = 0u64;
        let codes = values
            .iter()
            .map(|value| {
                let code = self.lookup(column, value.as_ref());
                if code == UNKNOWN_CODE {
                    unknown += 1;
                }
                code
            })
            .collect();
        (codes, unknown)
    }

    /// Number of distinct values seen in `column`.
    pub fn cardinality(&self, column: &str) -> Result<usize> {
        self.columns
            .get(column)
            .map(|codes| codes.values.len())
            .ok_or_else(|| PipelineError::ColumnNotFound(column.to_string()))
    }

    /// Cardinality of every known column.
    pub fn cardinalities(&self) -> BTreeMap<String, usize> {
        self.columns
            .iter()
            .map(|(name, codes)| (name.clone(), codes.values.len()))
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Snapshot the trained mapping.
    pub fn export(&self) -> CodecState {
        CodecState {
            columns: self
                .columns
                .iter()
                .map(|(name, codes)| (name.clone(), codes.values.clone()))
                .collect(),
        }
    }

    /// Rebuild a codec from an exported mapping.
    ///
    /// Fails when a column lists the same value twice, since codes would no
    /// longer be positions.
    pub fn import(state: CodecState) -> Result<Self> {
        for (name, values) in &state.columns {
            let mut seen = HashSet::with_capacity(values.len());
            if let Some(duplicate) = values.iter().find(|v| !seen.insert(v.as_str())) {
                return Err(PipelineError::ArtifactMismatch(format!(
                    "column '{}' lists category '{}' twice",
                    name, duplicate
                )));
            }
        }

        let mut codec = Self::new();
        for (name, values) in state.columns {
            let codes = codec.columns.entry(name).or_default();
            for value in &values {
                codes.observe(value);
            }
        }
        Ok(codec)
    }
}

impl TryFrom<CodecState> for CategoryCodec {
    type Error = PipelineError;

    fn try_from(state: CodecState) -> Result<Self> {
        Self::import(state)
    }
}

/// Serialized in the [`CodecState`] layout without cloning the value lists.
impl Serialize for CategoryCodec {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let columns: BTreeMap<&str, &[String]> = self
            .columns
            .iter()
            .map(|(name, codes)| (name.as_str(), codes.values.as_slice()))
            .collect();
        let mut state = serializer.serialize_struct("CodecState", 1)?;
        state.serialize_field("columns", &columns)?;
        state.end()
    }
}
