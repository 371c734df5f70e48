//! Learned ranking of candidates.
//!
//! The forest is fit and evaluated on the same batch. It is a ranking
//! heuristic for one run, not a model that generalises across runs.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use aptamyx_common::{AptamyxError, Result, ScoringConfig, StageOutcome};

use crate::fold::paired_positions;
use crate::forest::{ForestParams, RandomForestRegressor};
use crate::sequence::gc_fraction;
use crate::table::{CandidateRecord, CandidateTable, Column};

/// Column the regressor is trained against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringTarget {
    Affinity,
    /// Used when docking is disabled and there is no affinity to learn.
    Mfe,
}

impl ScoringTarget {
    pub fn column(self) -> Column {
        match self {
            ScoringTarget::Affinity => Column::Affinity,
            ScoringTarget::Mfe => Column::Mfe,
        }
    }

    fn value(self, record: &CandidateRecord) -> Option<f64> {
        match self {
            ScoringTarget::Affinity => record.affinity,
            ScoringTarget::Mfe => record.mfe,
        }
    }
}

/// Design matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// GC fraction, paired-bracket count, then one indicator column per
/// distinct structure string (sorted).
pub fn derive_features(records: &[CandidateRecord]) -> Result<FeatureMatrix> {
    let categories: BTreeSet<&str> = records.iter().map(|r| r.structure.as_str()).collect();

    let mut names = vec!["gc_content".to_string(), "paired_bases".to_string()];
    names.extend(categories.iter().map(|s| format!("structure={s}")));

    let rows = records
        .iter()
        .map(|record| {
            let gc = gc_fraction(record.sequence.as_str());
            if !gc.is_finite() {
                return Err(AptamyxError::Data(format!(
                    "non-finite GC content for {}",
                    record.sequence
                )));
            }
            let mut row = Vec::with_capacity(names.len());
            row.push(gc);
            row.push(paired_positions(&record.structure) as f64);
            row.extend(
                categories
                    .iter()
                    .map(|c| if *c == record.structure { 1.0 } else { 0.0 }),
            );
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FeatureMatrix { names, rows })
}

pub struct CandidateScorer {
    params: ForestParams,
}

impl CandidateScorer {
    pub fn new(params: ForestParams) -> Self {
        Self { params }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(ForestParams::from(config))
    }

    /// Columns a table needs before it can be scored against `target`.
    pub fn required_columns(target: ScoringTarget) -> [Column; 3] {
        [Column::Sequence, Column::Structure, target.column()]
    }

    /// Score against affinity. See [`CandidateScorer::score_against`].
    pub fn score(&self, table: &CandidateTable) -> StageOutcome<CandidateTable> {
        self.score_against(table, ScoringTarget::Affinity)
    }

    /// Add a `score` column and sort descending by it.
    ///
    /// Any failure returns the input table unchanged (unsorted, unscored)
    /// as a `Degraded` outcome carrying the error.
    pub fn score_against(
        &self,
        table: &CandidateTable,
        target: ScoringTarget,
    ) -> StageOutcome<CandidateTable> {
        match self.try_score(table, target) {
            Ok(scored) => StageOutcome::Ok(scored),
            Err(e) => {
                warn!(error = %e, rows = table.len(), "Scoring failed, returning unscored table");
                StageOutcome::degraded(table.clone(), e)
            }
        }
    }

    fn try_score(&self, table: &CandidateTable, target: ScoringTarget) -> Result<CandidateTable> {
        let missing: Vec<&str> = Self::required_columns(target)
            .into_iter()
            .filter(|c| !table.has_column(*c))
            .map(Column::name)
            .collect();
        if !missing.is_empty() {
            return Err(AptamyxError::Data(format!(
                "missing required column(s): {}",
                missing.join(", ")
            )));
        }

        let features = derive_features(table.rows())?;
        debug!(features = features.names.len(), rows = features.rows.len(), "Features derived");

        // rows without a target value (failed folds) are scored but not trained on
        let (train_x, train_y): (Vec<Vec<f64>>, Vec<f64>) = table
            .rows()
            .iter()
            .zip(&features.rows)
            .filter_map(|(record, row)| target.value(record).map(|y| (row.clone(), y)))
            .unzip();
        if train_y.is_empty() && !table.is_empty() {
            return Err(AptamyxError::Data(format!(
                "no row has a value for '{}'",
                target.column().name()
            )));
        }

        let mut model = RandomForestRegressor::new(self.params);
        model.fit(&train_x, &train_y)?;
        let scores = model.predict(&features.rows)?;

        let mut scored = table.clone();
        for (record, score) in scored.rows_mut().iter_mut().zip(scores) {
            record.score = Some(score);
        }
        scored.add_column(Column::Score);
        scored.sort_by_score_desc();

        info!(
            rows = scored.len(),
            trained_on = train_y.len(),
            target = target.column().name(),
            trees = model.n_trees(),
            "Candidates scored"
        );
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Sequence;

    fn table(rows: &[(&str, &str, f64)]) -> CandidateTable {
        let records = rows
            .iter()
            .map(|(seq, structure, affinity)| {
                let mut r = CandidateRecord::new(Sequence::parse(seq).unwrap());
                r.structure = structure.to_string();
                r.mfe = Some(-1.0);
                r.affinity = Some(*affinity);
                r
            })
            .collect();
        let mut t = CandidateTable::new(records);
        t.add_column(Column::Affinity);
        t
    }

    fn sample() -> CandidateTable {
        table(&[
            ("AAAAAAAAAAAAAAA", "...............", -4.0),
            ("GGGGAAAACCCCAAA", "((((....))))...", -9.0),
            ("GCGCGCGCGCGCGCG", "...............", -12.0),
            ("ACGTACGTACGTACG", "(((.......)))..", -8.0),
            ("TTTTTTTTTTTTTTT", "...............", -4.0),
        ])
    }

    #[test]
    fn test_features_layout() {
        let t = sample();
        let features = derive_features(t.rows()).unwrap();
        assert_eq!(features.names[..2], ["gc_content", "paired_bases"]);
        // three distinct structures
        assert_eq!(features.names.len(), 5);
        assert_eq!(features.rows[1][1], 8.0);
        assert_eq!(features.rows[2][0], 1.0);
        assert!(features.rows.iter().all(|r| r[2..].iter().sum::<f64>() == 1.0));
    }

    #[test]
    fn test_score_sorts_descending() {
        let scorer = CandidateScorer::new(ForestParams::default());
        let outcome = scorer.score(&sample());
        assert!(!outcome.is_degraded(), "{:?}", outcome.error());

        let scored = outcome.into_value();
        assert!(scored.has_column(Column::Score));
        assert_eq!(scored.len(), 5);
        let scores: Vec<f64> = scored.rows().iter().map(|r| r.score.unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
    }

    #[test]
    fn test_fixed_seed_is_idempotent() {
        let scorer = CandidateScorer::new(ForestParams::default());
        let a = scorer.score(&sample()).into_value();
        let b = scorer.score(&sample()).into_value();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_affinity_is_data_error() {
        let mut t = sample();
        t.remove_column(Column::Affinity);
        let outcome = CandidateScorer::new(ForestParams::default()).score(&t);

        assert!(outcome.is_degraded());
        assert!(matches!(outcome.error(), Some(AptamyxError::Data(_))));
        let unchanged = outcome.into_value();
        assert_eq!(unchanged, t);
        assert!(!unchanged.has_column(Column::Score));
    }

    #[test]
    fn test_mfe_target_skips_failed_rows_in_training() {
        let mut t = sample();
        t.remove_column(Column::Affinity);
        t.rows_mut()[0].mfe = None;
        let outcome = CandidateScorer::new(ForestParams::default())
            .score_against(&t, ScoringTarget::Mfe);
        assert!(!outcome.is_degraded());
        assert!(outcome.value().rows().iter().all(|r| r.score.is_some()));
    }
}
