//! Threshold treatment regimes and per-subject compliance.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WeightError;
use crate::panel::Panel;
use crate::weights::validate_weights;

/// A deterministic treatment rule indexed by visit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Treat at every visit with `visit_time >= x`, never before.
    TreatFrom(u32),
    /// Never treat during observed follow-up.
    Never,
}

impl Regime {
    /// Treatment indicator the regime prescribes at `visit_time`.
    pub fn prescribes(&self, visit_time: u32) -> bool {
        match self {
            Regime::TreatFrom(x) => visit_time >= *x,
            Regime::Never => false,
        }
    }

    pub fn threshold(&self) -> Option<u32> {
        match self {
            Regime::TreatFrom(x) => Some(*x),
            Regime::Never => None,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::TreatFrom(x) => write!(f, "treat from visit {}", x),
            Regime::Never => write!(f, "never treat"),
        }
    }
}

/// Build the candidate set: one threshold regime per entry, optionally
/// followed by the never-treat boundary regime.
pub fn candidate_regimes(thresholds: impl IntoIterator<Item = u32>, include_never: bool) -> Vec<Regime> {
    let mut regimes: Vec<Regime> = thresholds.into_iter().map(Regime::TreatFrom).collect();
    if include_never {
        regimes.push(Regime::Never);
    }
    regimes
}

/// Per-subject evaluation of one regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectOutcome {
    pub subject_id: i64,
    /// Observed treatment indicator at the subject's last visit
    pub treated_last: bool,
    /// Weight attached to the subject's last visit
    pub weight: f64,
    /// True only if the observed treatment matches the regime at every visit
    pub compliant: bool,
}

/// Evaluate `regime` against every subject in `panel`.
///
/// `weights` holds one weight per panel record; only the weight of each
/// subject's last record is used.
///
/// # Errors
/// Returns `WeightError::LengthMismatch` if `weights` does not hold exactly
/// one entry per record, and `WeightError::InvalidWeight` for a negative or
/// non-finite weight.
pub fn evaluate(
    panel: &Panel,
    weights: &[f64],
    regime: Regime,
) -> Result<Vec<SubjectOutcome>, WeightError> {
    validate_weights(weights, panel.n_records())?;

    let rows = panel
        .subjects()
        .iter()
        .filter(|span| !span.is_empty())
        .map(|span| {
            let records = panel.subject_records(span);
            let compliant = records
                .iter()
                .all(|r| regime.prescribes(r.visit_time) == r.treated);
            let last = span.end - 1;
            SubjectOutcome {
                subject_id: span.subject_id,
                treated_last: panel.records()[last].treated,
                weight: weights[last],
                compliant,
            }
        })
        .collect();
    Ok(rows)
}

pub fn count_compliant(rows: &[SubjectOutcome]) -> usize {
    rows.iter().filter(|r| r.compliant).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::SubjectVisit;

    /// subject1 = [0,0,1], subject2 = [0,1,1], subject3 = [0,0,0]
    fn three_subject_panel() -> Panel {
        let paths = [(1, [false, false, true]), (2, [false, true, true]), (3, [false, false, false])];
        let records = paths
            .iter()
            .flat_map(|(id, path)| {
                path.iter()
                    .enumerate()
                    .map(move |(t, &trt)| SubjectVisit::new(*id, t as u32, trt))
            })
            .collect();
        Panel::new(records, vec![]).unwrap()
    }

    #[test]
    fn test_prescribes() {
        assert!(!Regime::TreatFrom(2).prescribes(1));
        assert!(Regime::TreatFrom(2).prescribes(2));
        assert!(Regime::TreatFrom(0).prescribes(0));
        assert!(!Regime::Never.prescribes(100));
    }

    #[test]
    fn test_threshold_two_compliance() {
        let panel = three_subject_panel();
        let rows = evaluate(&panel, &[1.0; 9], Regime::TreatFrom(2)).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows[0].compliant);
        assert!(rows[0].treated_last);
        assert!(!rows[1].compliant);
        assert!(!rows[2].compliant);
        assert!(!rows[2].treated_last);
        assert_eq!(count_compliant(&rows), 1);
    }

    #[test]
    fn test_threshold_zero_nobody_complies() {
        let panel = three_subject_panel();
        let rows = evaluate(&panel, &[1.0; 9], Regime::TreatFrom(0)).unwrap();
        assert_eq!(count_compliant(&rows), 0);
    }

    #[test]
    fn test_never_regime() {
        let panel = three_subject_panel();
        let rows = evaluate(&panel, &[1.0; 9], Regime::Never).unwrap();
        let flags: Vec<bool> = rows.iter().map(|r| r.compliant).collect();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[test]
    fn test_uses_last_record_weight() {
        let panel = three_subject_panel();
        let weights = [0.1, 0.2, 0.3, 1.1, 1.2, 1.3, 2.1, 2.2, 2.3];
        let rows = evaluate(&panel, &weights, Regime::TreatFrom(1)).unwrap();
        let last: Vec<f64> = rows.iter().map(|r| r.weight).collect();
        assert_eq!(last, vec![0.3, 1.3, 2.3]);
        assert!(rows[1].compliant);
    }

    #[test]
    fn test_single_visit_subjects() {
        let records = vec![SubjectVisit::new(1, 0, true), SubjectVisit::new(2, 0, false)];
        let panel = Panel::new(records, vec![]).unwrap();

        let rows = evaluate(&panel, &[1.0, 1.0], Regime::TreatFrom(0)).unwrap();
        assert!(rows[0].compliant);
        assert!(!rows[1].compliant);

        let rows = evaluate(&panel, &[1.0, 1.0], Regime::TreatFrom(3)).unwrap();
        assert!(!rows[0].compliant);
        assert!(rows[1].compliant);
    }

    #[test]
    fn test_weight_length_mismatch_is_an_error() {
        let panel = three_subject_panel();
        let err = evaluate(&panel, &[1.0], Regime::TreatFrom(2)).unwrap_err();
        assert_eq!(
            err,
            WeightError::LengthMismatch {
                expected: 9,
                found: 1
            }
        );
    }

    #[test]
    fn test_candidate_regimes() {
        let regimes = candidate_regimes(0..=2, true);
        assert_eq!(
            regimes,
            vec![
                Regime::TreatFrom(0),
                Regime::TreatFrom(1),
                Regime::TreatFrom(2),
                Regime::Never
            ]
        );
        assert_eq!(candidate_regimes([4], false), vec![Regime::TreatFrom(4)]);
    }
}
