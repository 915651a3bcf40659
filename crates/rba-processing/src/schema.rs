//! Explicit column schema of the login-event source.
//!
//! A [`Schema`] is an ordered list of typed column declarations. It is checked
//! once with [`Schema::validate`] and matched against the source header with
//! [`Schema::resolve`], so a missing or renamed required column fails before the
//! first record is read. The resolved output column list never changes during a run.

use crate::error::{PipelineError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// How a column is coerced and emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Parsed with the configured timestamp format, emitted as epoch milliseconds.
    Timestamp,
    /// Coerced to `f64`; `scale` columns feed the running scaler.
    Numeric { scale: bool },
    /// Replaced by a category code.
    Categorical,
    /// Coerced to a two-valued flag, emitted as `0`/`1`.
    Flag,
    /// Raw text, checked for presence only and never emitted.
    Text,
}

/// Columns that together identify a record for traceability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    User,
    Timestamp,
    Address,
}

/// Declaration of a single source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    /// A record missing (or failing to coerce) a required column is dropped.
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<KeyRole>,
    /// Whether the column appears in the output file.
    pub emit: bool,
}

impl ColumnSpec {
    fn new(name: impl Into<String>, kind: ColumnKind, emit: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            role: None,
            emit,
        }
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Timestamp, true)
    }

    pub fn numeric(name: impl Into<String>, scale: bool) -> Self {
        Self::new(name, ColumnKind::Numeric { scale }, true)
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Categorical, true)
    }

    pub fn flag(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Flag, true)
    }

    /// Text columns are never emitted.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text, false)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn role(mut self, role: KeyRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn is_scaled(&self) -> bool {
        matches!(self.kind, ColumnKind::Numeric { scale: true })
    }
}

static RBA_SCHEMA: Lazy<Schema> = Lazy::new(|| Schema {
    columns: vec![
        ColumnSpec::timestamp("Login Timestamp")
            .required()
            .role(KeyRole::Timestamp),
        ColumnSpec::categorical("User ID")
            .required()
            .role(KeyRole::User),
        ColumnSpec::numeric("Round-Trip Time [ms]", true).required(),
        ColumnSpec::text("IP Address")
            .required()
            .role(KeyRole::Address),
        ColumnSpec::categorical("Country").required(),
        ColumnSpec::categorical("Region"),
        ColumnSpec::categorical("City"),
        ColumnSpec::numeric("ASN", true),
        ColumnSpec::text("User Agent String"),
        ColumnSpec::categorical("Browser Name and Version"),
        ColumnSpec::categorical("OS Name and Version"),
        ColumnSpec::categorical("Device Type"),
        ColumnSpec::flag("Login Successful"),
        ColumnSpec::flag("Is Attack IP"),
        ColumnSpec::flag("Is Account Takeover"),
    ],
});

/// Ordered list of typed column declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::rba()
    }
}

impl Schema {
    /// Create and validate a schema.
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        let schema = Self { columns };
        schema.validate()?;
        Ok(schema)
    }

    /// The risk-based-authentication login dataset.
    pub fn rba() -> Self {
        RBA_SCHEMA.clone()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Check the declaration itself, independent of any source.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "schema declares no columns".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut roles = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "schema declares '{}' twice",
                    column.name
                )));
            }
            if let Some(role) = column.role
                && !roles.insert(role)
            {
                return Err(PipelineError::InvalidConfig(format!(
                    "schema assigns role {:?} to more than one column",
                    role
                )));
            }
            if column.kind == ColumnKind::Text && column.emit {
                return Err(PipelineError::InvalidConfig(format!(
                    "text column '{}' cannot be emitted",
                    column.name
                )));
            }
        }

        if !self.columns.iter().any(|c| c.emit) {
            return Err(PipelineError::InvalidConfig(
                "schema emits no columns".to_string(),
            ));
        }

        Ok(())
    }

    /// Match the declaration against a source header.
    ///
    /// Required columns must be present. Optional columns absent from the header
    /// are left out of the run; undeclared header columns are ignored.
    pub fn resolve(&self, header: &[String]) -> Result<ResolvedSchema> {
        if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
            return Err(PipelineError::MalformedHeader(
                "source has no header row".to_string(),
            ));
        }

        let header: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let name = name.trim();
                if i == 0 {
                    name.trim_start_matches('\u{feff}').to_string()
                } else {
                    name.to_string()
                }
            })
            .collect();

        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(header.len());
        for (position, name) in header.iter().enumerate() {
            if positions.insert(name.as_str(), position).is_some() {
                return Err(PipelineError::MalformedHeader(format!(
                    "column '{}' appears more than once",
                    name
                )));
            }
        }

        let mut columns = Vec::with_capacity(self.columns.len());
        let mut missing_required = Vec::new();
        for spec in &self.columns {
            match positions.get(spec.name.as_str()) {
                Some(&position) => columns.push(ResolvedColumn {
                    spec: spec.clone(),
                    position,
                }),
                None if spec.required => missing_required.push(spec.name.clone()),
                None => warn!(
                    "Optional column '{}' not in source header, leaving it out",
                    spec.name
                ),
            }
        }

        if !missing_required.is_empty() {
            return Err(PipelineError::MalformedHeader(format!(
                "required columns missing: {}",
                missing_required.join(", ")
            )));
        }

        let declared: HashSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        for name in header.iter().filter(|h| !declared.contains(h.as_str())) {
            debug!("Ignoring undeclared column '{}'", name);
        }

        if !columns.iter().any(|c| c.spec.emit) {
            return Err(PipelineError::MalformedHeader(
                "none of the emitted columns are present".to_string(),
            ));
        }

        Ok(ResolvedSchema { columns, header })
    }
}

/// A declared column bound to its position in the source header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub spec: ColumnSpec,
    pub position: usize,
}

/// Value type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Integer,
    Float,
    Flag,
}

/// An emitted column of the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub output_type: OutputType,
}

/// Schema matched against a concrete source header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    columns: Vec<ResolvedColumn>,
    header: Vec<String>,
}

impl ResolvedSchema {
    /// Declared columns present in the source, in declaration order.
    pub fn columns(&self) -> &[ResolvedColumn] {
        &self.columns
    }

    /// The normalized source header.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Output columns in write order.
    pub fn output_columns(&self) -> Vec<OutputColumn> {
        self.columns
            .iter()
            .filter(|c| c.spec.emit)
            .map(|c| OutputColumn {
                name: c.spec.name.clone(),
                output_type: match c.spec.kind {
                    ColumnKind::Numeric { .. } => OutputType::Float,
                    ColumnKind::Flag => OutputType::Flag,
                    _ => OutputType::Integer,
                },
            })
            .collect()
    }

    /// Emitted categorical columns, the ones the codec is trained on.
    pub fn categorical_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.spec.emit && c.spec.kind == ColumnKind::Categorical)
            .map(|c| c.spec.name.as_str())
    }

    /// Emitted numeric columns fed to the scaler.
    pub fn scaled_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.spec.emit && c.spec.is_scaled())
            .map(|c| c.spec.name.as_str())
    }

    /// Header position of the column playing `role`, if any.
    pub fn role_position(&self, role: KeyRole) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.spec.role == Some(role))
            .map(|c| c.position)
    }
}
