//! Longitudinal subject-visit panel.
//!
//! A [`Panel`] holds one record per subject per annual visit, grouped so that
//! each subject's records are contiguous and ordered by visit time. The panel
//! is validated once on construction and is immutable afterwards; bootstrap
//! replicates are built as new panels by replaying validated records.
//!
//! Death is absorbing: records after a subject's first `Died` record are
//! dropped when the panel is built.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::build_cluster_indices;
use crate::error::{DataShapeError, RegimeError};

/// Vital status recorded at a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Alive,
    Died,
}

impl EventStatus {
    /// Parse a status cell: `0`/`alive` or `1`/`dead`/`died`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "0" | "0.0" | "alive" | "censored" => Some(EventStatus::Alive),
            "1" | "1.0" | "dead" | "died" => Some(EventStatus::Died),
            _ => None,
        }
    }
}

/// One subject at one visit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectVisit {
    pub subject_id: i64,
    /// 0-indexed annual visit
    pub visit_time: u32,
    /// Treatment received at or before this visit
    pub treated: bool,
    pub status: EventStatus,
    /// Values aligned with [`Panel::covariate_names`]; NaN marks a missing cell
    pub covariates: Vec<f64>,
}

impl SubjectVisit {
    pub fn new(subject_id: i64, visit_time: u32, treated: bool) -> Self {
        Self {
            subject_id,
            visit_time,
            treated,
            status: EventStatus::Alive,
            covariates: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_covariates(mut self, covariates: Vec<f64>) -> Self {
        self.covariates = covariates;
        self
    }
}

/// Location of one subject's records inside [`Panel::records`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectSpan {
    pub subject_id: i64,
    pub start: usize,
    pub end: usize,
}

impl SubjectSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Input column mapping for CSV loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub id: String,
    pub time: String,
    pub treatment: String,
    /// Vital status column; every visit counts as alive when absent
    pub status: Option<String>,
    pub covariates: Vec<String>,
    /// Precomputed inverse-probability weights, loaded as an extra covariate
    pub weight: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            time: "time".to_string(),
            treatment: "trt".to_string(),
            status: None,
            covariates: Vec::new(),
            weight: None,
        }
    }
}

impl ColumnMap {
    /// Covariate columns to load, with the weight column appended if it is
    /// not already listed.
    fn value_columns(&self) -> Vec<String> {
        let mut columns = self.covariates.clone();
        if let Some(weight) = &self.weight {
            if !columns.contains(weight) {
                columns.push(weight.clone());
            }
        }
        columns
    }
}

/// Immutable, validated longitudinal panel.
#[derive(Debug, Clone)]
pub struct Panel {
    records: Vec<SubjectVisit>,
    subjects: Vec<SubjectSpan>,
    covariate_names: Vec<String>,
    truncated_rows: usize,
}

impl Panel {
    /// Validate and group records into a panel.
    ///
    /// Subjects keep their order of first appearance. Within a subject the
    /// records must already be in strictly increasing visit order starting at
    /// visit 0, and treatment must never switch back off once started.
    /// Records after a subject's first death are dropped before these checks.
    ///
    /// # Errors
    /// Any [`DataShapeError`]; nothing is estimated from a malformed panel.
    pub fn new(
        records: Vec<SubjectVisit>,
        covariate_names: Vec<String>,
    ) -> Result<Self, DataShapeError> {
        if records.is_empty() {
            return Err(DataShapeError::EmptyPanel);
        }
        if let Some(bad) = records
            .iter()
            .find(|r| r.covariates.len() != covariate_names.len())
        {
            return Err(DataShapeError::CovariateArity {
                expected: covariate_names.len(),
                found: bad.covariates.len(),
            });
        }

        let ids: Vec<i64> = records.iter().map(|r| r.subject_id).collect();
        let groups = build_cluster_indices(&ids);

        // Cut every subject at its first death; only the kept prefix is validated
        let mut kept: Vec<&[usize]> = Vec::with_capacity(groups.n_clusters);
        let mut truncated_rows = 0;
        for members in &groups.indices {
            let cut = members
                .iter()
                .position(|&i| records[i].status == EventStatus::Died)
                .map_or(members.len(), |k| k + 1);
            let dropped = members.len() - cut;
            if dropped > 0 {
                debug!(
                    subject_id = records[members[0]].subject_id,
                    dropped, "dropping records after death"
                );
                truncated_rows += dropped;
            }
            let prefix = &members[..cut];
            validate_subject(&records, prefix)?;
            kept.push(prefix);
        }

        let mut slots: Vec<Option<SubjectVisit>> = records.into_iter().map(Some).collect();
        let mut grouped = Vec::with_capacity(slots.len() - truncated_rows);
        let mut subjects = Vec::with_capacity(kept.len());
        for prefix in kept {
            let start = grouped.len();
            grouped.extend(prefix.iter().filter_map(|&i| slots[i].take()));
            subjects.push(SubjectSpan {
                subject_id: ids[prefix[0]],
                start,
                end: grouped.len(),
            });
        }

        Ok(Self {
            records: grouped,
            subjects,
            covariate_names,
            truncated_rows,
        })
    }

    /// Assemble a panel from records already known to satisfy the panel
    /// invariants, e.g. replayed from another validated panel.
    pub(crate) fn from_grouped(
        records: Vec<SubjectVisit>,
        subjects: Vec<SubjectSpan>,
        covariate_names: Vec<String>,
    ) -> Self {
        debug_assert_eq!(
            subjects.iter().map(SubjectSpan::len).sum::<usize>(),
            records.len()
        );
        Self {
            records,
            subjects,
            covariate_names,
            truncated_rows: 0,
        }
    }

    pub fn records(&self) -> &[SubjectVisit] {
        &self.records
    }

    pub fn subjects(&self) -> &[SubjectSpan] {
        &self.subjects
    }

    pub fn subject_records(&self, span: &SubjectSpan) -> &[SubjectVisit] {
        &self.records[span.start..span.end]
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn n_records(&self) -> usize {
        self.records.len()
    }

    /// Largest visit time present in the panel.
    pub fn max_visit(&self) -> u32 {
        self.records.iter().map(|r| r.visit_time).max().unwrap_or(0)
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    /// Number of post-death records dropped during construction.
    pub fn truncated_rows(&self) -> usize {
        self.truncated_rows
    }

    /// Values of a named covariate column, in record order.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.covariate_names.iter().position(|c| c == name)?;
        Some(self.records.iter().map(|r| r.covariates[idx]).collect())
    }

    /// Load a long-format CSV: one row per subject-visit.
    pub fn from_long_csv(path: &Path, columns: &ColumnMap) -> Result<Self, RegimeError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_long_csv(&content, columns)?)
    }

    /// Load a wide-format CSV: one row per subject, time-varying columns
    /// suffixed with `_<visit>`.
    pub fn from_wide_csv(path: &Path, columns: &ColumnMap) -> Result<Self, RegimeError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_wide_csv(&content, columns)?)
    }

    pub fn parse_long_csv(content: &str, columns: &ColumnMap) -> Result<Self, DataShapeError> {
        let (header, rows) = read_table(content)?;

        let id_idx = header.require(&columns.id)?;
        let time_idx = header.require(&columns.time)?;
        let trt_idx = header.require(&columns.treatment)?;
        let status_idx = match &columns.status {
            Some(name) => Some(header.require(name)?),
            None => None,
        };
        let value_columns = columns.value_columns();
        let value_idx = value_columns
            .iter()
            .map(|c| header.require(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let status = match status_idx {
                Some(i) => row.status(i, &header.names[i])?,
                None => EventStatus::Alive,
            };
            let covariates = value_idx
                .iter()
                .map(|&i| row.number(i, &header.names[i]))
                .collect::<Result<Vec<_>, _>>()?;
            records.push(SubjectVisit {
                subject_id: row.integer(id_idx, &columns.id)?,
                visit_time: row.visit(time_idx, &columns.time)?,
                treated: row.indicator(trt_idx, &columns.treatment)?,
                status,
                covariates,
            });
        }

        Self::new(records, value_columns)
    }

    pub fn parse_wide_csv(content: &str, columns: &ColumnMap) -> Result<Self, DataShapeError> {
        let (header, rows) = read_table(content)?;
        let id_idx = header.require(&columns.id)?;

        let prefix = format!("{}_", columns.treatment);
        let mut visits: Vec<u32> = header
            .names
            .iter()
            .filter_map(|name| name.strip_prefix(&prefix)?.parse().ok())
            .collect();
        visits.sort_unstable();
        visits.dedup();
        if visits.is_empty() {
            return Err(DataShapeError::MissingColumn(format!("{}0", prefix)));
        }

        let value_columns = columns.value_columns();
        let mut records = Vec::new();
        for row in &rows {
            let subject_id = row.integer(id_idx, &columns.id)?;
            for (k, &visit) in visits.iter().enumerate() {
                let trt_idx = header.require(&format!("{}{}", prefix, visit))?;
                if row.is_missing(trt_idx) {
                    if k == 0 {
                        return Err(DataShapeError::MissingBaselineTreatment {
                            line: row.line,
                            subject_id,
                            column: header.names[trt_idx].clone(),
                        });
                    }
                    // follow-up ends at the first visit without a treatment value
                    break;
                }
                let status = match &columns.status {
                    Some(name) => match header.position(&format!("{}_{}", name, visit)) {
                        Some(i) => row.status(i, &header.names[i])?,
                        None => EventStatus::Alive,
                    },
                    None => EventStatus::Alive,
                };
                let mut covariates = Vec::with_capacity(value_columns.len());
                for name in &value_columns {
                    let idx = header
                        .position(&format!("{}_{}", name, visit))
                        .map_or_else(|| header.require(name), Ok)?;
                    covariates.push(row.number(idx, &header.names[idx])?);
                }
                records.push(SubjectVisit {
                    subject_id,
                    visit_time: visit,
                    treated: row.indicator(trt_idx, &header.names[trt_idx])?,
                    status,
                    covariates,
                });
            }
        }

        Self::new(records, value_columns)
    }
}

/// Check ordering, baseline and absorbing treatment for one subject's rows.
fn validate_subject(records: &[SubjectVisit], members: &[usize]) -> Result<(), DataShapeError> {
    let first = &records[members[0]];
    if first.visit_time != 0 {
        return Err(DataShapeError::MissingBaseline {
            subject_id: first.subject_id,
            first_visit: first.visit_time,
        });
    }

    for pair in members.windows(2) {
        let prev = &records[pair[0]];
        let curr = &records[pair[1]];
        if curr.visit_time == prev.visit_time {
            return Err(DataShapeError::DuplicateVisit {
                subject_id: curr.subject_id,
                visit_time: curr.visit_time,
            });
        }
        if curr.visit_time < prev.visit_time {
            return Err(DataShapeError::NonMonotonicVisit {
                subject_id: curr.subject_id,
                visit_time: curr.visit_time,
                previous: prev.visit_time,
            });
        }
        if prev.treated && !curr.treated {
            return Err(DataShapeError::TreatmentReverted {
                subject_id: curr.subject_id,
                visit_time: curr.visit_time,
            });
        }
    }
    Ok(())
}

struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn require(&self, name: &str) -> Result<usize, DataShapeError> {
        self.position(name)
            .ok_or_else(|| DataShapeError::MissingColumn(name.to_string()))
    }
}

struct Row {
    line: usize,
    fields: csv::StringRecord,
}

impl Row {
    fn invalid(&self, idx: usize, column: &str) -> DataShapeError {
        DataShapeError::InvalidCell {
            line: self.line,
            column: column.to_string(),
            value: self.fields[idx].to_string(),
        }
    }

    fn is_missing(&self, idx: usize) -> bool {
        matches!(&self.fields[idx], "" | "." | "NA" | "NaN")
    }

    fn integer(&self, idx: usize, column: &str) -> Result<i64, DataShapeError> {
        let raw = &self.fields[idx];
        if let Ok(v) = raw.parse::<i64>() {
            return Ok(v);
        }
        // integral floats such as "3.0" are accepted
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
            _ => Err(self.invalid(idx, column)),
        }
    }

    fn visit(&self, idx: usize, column: &str) -> Result<u32, DataShapeError> {
        let v = self.integer(idx, column)?;
        u32::try_from(v).map_err(|_| self.invalid(idx, column))
    }

    fn indicator(&self, idx: usize, column: &str) -> Result<bool, DataShapeError> {
        match self.fields[idx].to_lowercase().as_str() {
            "1" | "1.0" | "true" => Ok(true),
            "0" | "0.0" | "false" => Ok(false),
            _ => Err(self.invalid(idx, column)),
        }
    }

    fn status(&self, idx: usize, column: &str) -> Result<EventStatus, DataShapeError> {
        EventStatus::parse(&self.fields[idx]).ok_or_else(|| self.invalid(idx, column))
    }

    fn number(&self, idx: usize, column: &str) -> Result<f64, DataShapeError> {
        if self.is_missing(idx) {
            return Ok(f64::NAN);
        }
        self.fields[idx]
            .parse()
            .map_err(|_| self.invalid(idx, column))
    }
}

fn malformed(err: csv::Error) -> DataShapeError {
    DataShapeError::MalformedCsv {
        line: err.position().map_or(0, |p| p.line() as usize),
        message: err.to_string(),
    }
}

/// Read a headed CSV table. Quoted fields may contain commas and `""`
/// escapes; surrounding whitespace is trimmed.
fn read_table(content: &str) -> Result<(Header, Vec<Row>), DataShapeError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let names: Vec<String> = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(DataShapeError::EmptyPanel);
    }
    let index = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.clone(), i))
        .collect();
    let header = Header { names, index };

    let mut rows = Vec::new();
    for result in reader.into_records() {
        let fields = result.map_err(malformed)?;
        // whitespace-only lines
        if fields.len() == 1 && fields[0].is_empty() {
            continue;
        }
        let line = fields.position().map_or(0, |p| p.line() as usize);
        if fields.len() != header.names.len() {
            return Err(DataShapeError::RaggedRow {
                line,
                expected: header.names.len(),
                found: fields.len(),
            });
        }
        rows.push(Row { line, fields });
    }
    Ok((header, rows))
}
