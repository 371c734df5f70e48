//! The candidate table accumulated across pipeline stages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use aptamyx_common::{AptamyxError, Result};

use crate::sequence::Sequence;

/// One row per candidate sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub sequence: Sequence,
    /// Dot-bracket annotation; empty when folding failed.
    pub structure: String,
    /// `None` when folding failed.
    pub mfe: Option<f64>,
    pub molecular_weight: f64,
    pub model_path: Option<PathBuf>,
    pub affinity: Option<f64>,
    pub score: Option<f64>,
    /// Why this row carries sentinel values, if it does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl CandidateRecord {
    /// A freshly generated candidate with nothing predicted yet.
    pub fn new(sequence: Sequence) -> Self {
        let molecular_weight = sequence.molecular_weight();
        Self {
            sequence,
            structure: String::new(),
            mfe: None,
            molecular_weight,
            model_path: None,
            affinity: None,
            score: None,
            failure: None,
        }
    }

    /// Sentinel row for a candidate whose structure prediction failed.
    pub fn failed(sequence: Sequence, reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new(sequence)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Sequence,
    Structure,
    Mfe,
    MolecularWeight,
    ModelPath,
    Affinity,
    Score,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Sequence => "sequence",
            Column::Structure => "structure",
            Column::Mfe => "mfe",
            Column::MolecularWeight => "molecular_weight",
            Column::ModelPath => "model_path",
            Column::Affinity => "affinity",
            Column::Score => "score",
        }
    }

    fn render(self, record: &CandidateRecord) -> String {
        fn opt(value: Option<f64>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }
        match self {
            Column::Sequence => record.sequence.to_string(),
            Column::Structure => record.structure.clone(),
            Column::Mfe => opt(record.mfe),
            Column::MolecularWeight => record.molecular_weight.to_string(),
            Column::ModelPath => record
                .model_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            Column::Affinity => opt(record.affinity),
            Column::Score => opt(record.score),
        }
    }
}

/// Rows plus the set of columns that have actually been populated.
///
/// Columns are kept in export order. A column is only listed once the
/// stage that fills it has run, so "docking disabled" and "scored" are
/// visible on the table itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTable {
    columns: Vec<Column>,
    rows: Vec<CandidateRecord>,
}

impl CandidateTable {
    pub const BASE_COLUMNS: [Column; 4] = [
        Column::Sequence,
        Column::Structure,
        Column::Mfe,
        Column::MolecularWeight,
    ];

    pub fn new(rows: Vec<CandidateRecord>) -> Self {
        Self {
            columns: Self::BASE_COLUMNS.to_vec(),
            rows,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_columns(rows: Vec<CandidateRecord>, columns: &[Column]) -> Self {
        let mut table = Self {
            columns: Vec::new(),
            rows,
        };
        for column in columns {
            table.add_column(*column);
        }
        table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn add_column(&mut self, column: Column) {
        if !self.has_column(column) {
            self.columns.push(column);
            self.columns.sort();
        }
    }

    pub fn remove_column(&mut self, column: Column) {
        self.columns.retain(|c| *c != column);
    }

    pub fn rows(&self) -> &[CandidateRecord] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [CandidateRecord] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<CandidateRecord> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inner join on `sequence` against per-sequence affinities.
    ///
    /// Rows with no affinity are dropped. Joining a non-empty table down to
    /// nothing is reported as a `Data` error so the caller can keep the
    /// pre-join table instead.
    pub fn join_affinities(&self, affinities: &HashMap<Sequence, f64>) -> Result<CandidateTable> {
        let rows: Vec<CandidateRecord> = self
            .rows
            .iter()
            .filter_map(|row| {
                affinities.get(&row.sequence).map(|affinity| CandidateRecord {
                    affinity: Some(*affinity),
                    ..row.clone()
                })
            })
            .collect();

        if rows.is_empty() && !self.rows.is_empty() {
            return Err(AptamyxError::Data(format!(
                "affinity join matched none of {} candidates",
                self.rows.len()
            )));
        }

        let mut joined = Self {
            columns: self.columns.clone(),
            rows,
        };
        joined.add_column(Column::Affinity);
        Ok(joined)
    }

    /// Stable descending sort on `score`; unscored rows sink to the end.
    pub fn sort_by_score_desc(&mut self) {
        self.rows.sort_by(|a, b| match (a.score, b.score) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }

    /// First `n` rows in current order.
    pub fn top(&self, n: usize) -> &[CandidateRecord] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Header plus one line per row, present columns only, no index.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        self.write_records(&mut writer)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| AptamyxError::Data(format!("csv buffer: {e}")))?;
        String::from_utf8(bytes).map_err(|e| AptamyxError::Data(e.to_string()))
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        self.write_records(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_records<W: std::io::Write>(&self, writer: &mut csv::Writer<W>) -> Result<()> {
        writer.write_record(self.columns.iter().map(|c| c.name()))?;
        for row in &self.rows {
            writer.write_record(self.columns.iter().map(|c| c.render(row)))?;
        }
        Ok(())
    }
}
