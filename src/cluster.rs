//! Cluster (subject-level) bootstrap for regime estimates.
//!
//! Each replicate resamples whole subjects with replacement, replays every
//! drawn subject's visits into a fresh panel, and re-evaluates every regime on
//! it. Standard errors are the sample standard deviation of the replicate
//! estimates, accumulated with Welford's algorithm.
//!
//! Replicates are independent: the master seed generates one sub-seed per
//! replicate, so output is identical whether replicates run sequentially or
//! on the rayon pool.
//!
//! # References
//! - Cameron, A. C., & Miller, D. L. (2015). A Practitioner's Guide to
//!   Cluster-Robust Inference. Journal of Human Resources, 50(2), 317-372.

use std::collections::HashMap;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, WeightError};
use crate::panel::{Panel, SubjectSpan};
use crate::regime::{evaluate, Regime};
use crate::stats::{weighted_mean, WelfordState};
use crate::weights::{fit_weights, WeightPolicy, WeightProvider, WeightSpec};

/// Cluster membership information for grouped observations.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    /// indices[g] = row indices belonging to cluster g, in input order
    /// Invariant: flatten(indices) is a permutation of 0..n
    pub indices: Vec<Vec<usize>>,

    /// Invariant: n_clusters == indices.len()
    pub n_clusters: usize,
}

/// Group row indices by cluster id, clusters ordered by first appearance.
pub fn build_cluster_indices(cluster_ids: &[i64]) -> ClusterInfo {
    let n = cluster_ids.len();

    // Map from cluster ID to internal index
    let mut id_to_index: HashMap<i64, usize> = HashMap::new();
    let mut indices: Vec<Vec<usize>> = Vec::new();

    for (i, &id) in cluster_ids.iter().enumerate() {
        if let Some(&g) = id_to_index.get(&id) {
            indices[g].push(i);
        } else {
            let g = indices.len();
            id_to_index.insert(id, g);
            indices.push(vec![i]);
        }
    }

    let n_clusters = indices.len();
    debug_assert_eq!(indices.iter().map(Vec::len).sum::<usize>(), n);

    ClusterInfo {
        indices,
        n_clusters,
    }
}

/// One subject drawn into a replicate. `copy` counts earlier draws of the
/// same subject in that replicate, so duplicates stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Draw {
    pub subject_id: i64,
    pub copy: u32,
}

/// Draw subjects with replacement for one bootstrap replicate.
///
/// Sampling is over whole subjects (clusters), never individual visits, so
/// every drawn subject later contributes its complete visit history.
///
/// # Arguments
/// * `subjects` - Subject spans of the observed panel
/// * `rng` - Replicate-local random number generator
///
/// # Returns
/// * `Vec<Draw>` - Exactly `subjects.len()` draws, in draw order. A subject
///   drawn more than once appears with `copy = 0, 1, ...`
pub fn draw_subjects<R: Rng + ?Sized>(subjects: &[SubjectSpan], rng: &mut R) -> Vec<Draw> {
    let n = subjects.len();
    let mut seen: HashMap<i64, u32> = HashMap::with_capacity(n);
    (0..n)
        .map(|_| {
            let subject_id = subjects[rng.gen_range(0..n)].subject_id;
            let copy = seen.entry(subject_id).or_insert(0);
            let draw = Draw {
                subject_id,
                copy: *copy,
            };
            *copy += 1;
            draw
        })
        .collect()
}

/// A resampled panel plus, for each of its records, the index of the
/// observed record it replays.
#[derive(Debug, Clone)]
pub struct Replicate {
    pub panel: Panel,
    pub origin: Vec<usize>,
}

/// Subject lookup into an observed panel, built once per bootstrap.
pub struct ReplayIndex {
    spans: HashMap<i64, SubjectSpan>,
}

impl ReplayIndex {
    pub fn new(panel: &Panel) -> Self {
        let spans = panel
            .subjects()
            .iter()
            .map(|span| (span.subject_id, *span))
            .collect();
        Self { spans }
    }

    /// Expand draws into a replicate panel.
    ///
    /// Each draw replays exactly the visits its original subject has, in
    /// order; visit times are copied as observed, so sparse time axes cost
    /// nothing extra. The k-th draw becomes synthetic subject `k`, which
    /// keeps duplicate draws apart for providers that group by id.
    ///
    /// # Arguments
    /// * `panel` - The observed panel this index was built from
    /// * `draws` - Subjects drawn for the replicate, see [`draw_subjects`]
    ///
    /// # Returns
    /// * `Replicate` - The replicate panel plus, for each of its records, the
    ///   index of the observed record it replays. A draw of an unknown subject
    ///   yields an empty span.
    pub fn expand(&self, panel: &Panel, draws: &[Draw]) -> Replicate {
        let spans: Vec<Option<SubjectSpan>> = draws
            .iter()
            .map(|d| self.spans.get(&d.subject_id).copied())
            .collect();
        let n_rows: usize = spans.iter().flatten().map(SubjectSpan::len).sum();

        let mut records = Vec::with_capacity(n_rows);
        let mut origin = Vec::with_capacity(n_rows);
        let mut subjects = Vec::with_capacity(draws.len());

        for (k, span) in spans.iter().enumerate() {
            let synthetic_id = k as i64;
            let start = records.len();
            if let Some(span) = span {
                for (offset, observed) in panel.subject_records(span).iter().enumerate() {
                    let mut record = observed.clone();
                    record.subject_id = synthetic_id;
                    records.push(record);
                    origin.push(span.start + offset);
                }
            }
            subjects.push(SubjectSpan {
                subject_id: synthetic_id,
                start,
                end: records.len(),
            });
        }

        Replicate {
            panel: Panel::from_grouped(records, subjects, panel.covariate_names().to_vec()),
            origin,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapConfig {
    pub iterations: usize,
    /// Master seed; drawn from the system clock when `None`
    pub seed: Option<u64>,
    pub weight_policy: WeightPolicy,
    pub parallel: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            seed: None,
            weight_policy: WeightPolicy::Reuse,
            parallel: true,
        }
    }
}

/// Weights fitted on the observed panel, with the provider used to refit
/// replicates under [`WeightPolicy::Refit`].
#[derive(Clone, Copy)]
pub struct WeightContext<'a> {
    pub provider: &'a dyn WeightProvider,
    pub spec: &'a WeightSpec,
    pub observed: &'a [f64],
}

/// Outcome of one replicate, kept for reporting and reproducibility checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicateResult {
    pub index: usize,
    pub seed: u64,
    pub draws: Vec<Draw>,
    /// One entry per regime; `None` when the weighted mean was undefined
    pub estimates: Vec<Option<f64>>,
    /// Set when the replicate could not be evaluated at all
    pub failure: Option<String>,
}

/// Bootstrap variability of one regime's estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeBootstrap {
    pub regime: Regime,
    /// Sample SD of defined replicate estimates; NaN with fewer than two
    pub standard_error: f64,
    pub replicate_mean: f64,
    pub n_valid: usize,
    pub n_undefined: usize,
    pub n_failed: usize,
    /// The SE carries no sampling information: fewer than two defined
    /// estimates, or every defined estimate identical (SE of exactly zero,
    /// e.g. all resampled compliers share one outcome)
    pub degenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapSummary {
    pub seed: u64,
    pub iterations: usize,
    pub weight_policy: WeightPolicy,
    pub regimes: Vec<RegimeBootstrap>,
    pub replicates: Vec<ReplicateResult>,
}

/// Run the cluster bootstrap for every regime.
///
/// Algorithm:
/// 1. Derive one sub-seed per replicate from the master seed
/// 2. For each replicate: draw subjects with replacement, replay their
///    visits into a fresh panel, take weights per the weight policy
/// 3. Evaluate every regime on the replicate and compute its weighted mean
/// 4. Per regime, SE = sample SD of the defined replicate estimates
///
/// Per-replicate problems never abort the run: an undefined weighted mean is
/// recorded as a missing estimate and a failed weight refit marks the whole
/// replicate failed. Both are excluded from the standard error and counted.
///
/// # Arguments
/// * `panel` - Validated observed panel
/// * `weights` - Observed weights plus the provider used under `Refit`
/// * `regimes` - Regimes to estimate; estimates keep this order
/// * `config` - Iterations, master seed, weight policy and parallelism
///
/// # Returns
/// * `Result<BootstrapSummary, BootstrapError>` - Per-regime SEs and every
///   replicate's draws and estimates, or error if validation fails
///
/// # Errors
/// * `BootstrapError::NoIterations` if `iterations == 0`
/// * `BootstrapError::NoRegimes` if `regimes` is empty
/// * `BootstrapError::InsufficientClusters` with fewer than 2 subjects
pub fn run_bootstrap(
    panel: &Panel,
    weights: WeightContext<'_>,
    regimes: &[Regime],
    config: &BootstrapConfig,
) -> Result<BootstrapSummary, BootstrapError> {
    if config.iterations == 0 {
        return Err(BootstrapError::NoIterations);
    }
    if regimes.is_empty() {
        return Err(BootstrapError::NoRegimes);
    }
    if panel.n_subjects() < 2 {
        return Err(BootstrapError::InsufficientClusters {
            found: panel.n_subjects(),
        });
    }

    let seed = config.seed.unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    });
    info!(
        seed,
        iterations = config.iterations,
        subjects = panel.n_subjects(),
        regimes = regimes.len(),
        policy = ?config.weight_policy,
        "running cluster bootstrap"
    );

    // Sub-seeds are fixed up front so scheduling cannot change the draws
    let mut master = ChaCha8Rng::seed_from_u64(seed);
    let sub_seeds: Vec<u64> = (0..config.iterations).map(|_| master.next_u64()).collect();
    let index = ReplayIndex::new(panel);

    let run_one = |i: usize, sub_seed: u64| {
        run_replicate(panel, &index, weights, regimes, config.weight_policy, i, sub_seed)
    };
    let replicates: Vec<ReplicateResult> = if config.parallel {
        sub_seeds
            .par_iter()
            .enumerate()
            .map(|(i, &s)| run_one(i, s))
            .collect()
    } else {
        sub_seeds
            .iter()
            .enumerate()
            .map(|(i, &s)| run_one(i, s))
            .collect()
    };

    // Aggregate per regime
    let summaries = regimes
        .iter()
        .enumerate()
        .map(|(j, &regime)| summarize_regime(regime, j, &replicates))
        .collect();

    Ok(BootstrapSummary {
        seed,
        iterations: config.iterations,
        weight_policy: config.weight_policy,
        regimes: summaries,
        replicates,
    })
}

fn run_replicate(
    panel: &Panel,
    index: &ReplayIndex,
    weights: WeightContext<'_>,
    regimes: &[Regime],
    policy: WeightPolicy,
    replicate: usize,
    seed: u64,
) -> ReplicateResult {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let draws = draw_subjects(panel.subjects(), &mut rng);
    let sample = index.expand(panel, &draws);

    let replicate_weights = match policy {
        WeightPolicy::Reuse => Ok(sample.origin.iter().map(|&i| weights.observed[i]).collect()),
        WeightPolicy::Refit => fit_weights(weights.provider, &sample.panel, weights.spec),
    };

    let evaluated = replicate_weights.and_then(|w| {
        regimes
            .iter()
            .map(|&regime| -> Result<Option<f64>, WeightError> {
                Ok(weighted_mean(&evaluate(&sample.panel, &w, regime)?).ok())
            })
            .collect()
    });
    let (estimates, failure) = match evaluated {
        Ok(estimates) => (estimates, None),
        Err(err) => {
            warn!(replicate, error = %err, "replicate weights rejected; replicate excluded");
            (vec![None; regimes.len()], Some(err.to_string()))
        }
    };
    debug!(replicate, seed, records = sample.panel.n_records(), "replicate done");

    ReplicateResult {
        index: replicate,
        seed,
        draws,
        estimates,
        failure,
    }
}

fn summarize_regime(regime: Regime, j: usize, replicates: &[ReplicateResult]) -> RegimeBootstrap {
    let n_failed = replicates.iter().filter(|r| r.failure.is_some()).count();
    let n_undefined = replicates
        .iter()
        .filter(|r| r.failure.is_none() && r.estimates[j].is_none())
        .count();
    let welford: WelfordState = replicates.iter().filter_map(|r| r.estimates[j]).collect();

    let degenerate = welford.count() < 2 || welford.standard_error() == 0.0;
    if degenerate {
        warn!(
            %regime,
            valid = welford.count(),
            undefined = n_undefined,
            "resample degenerate: no replicate variability"
        );
    }

    RegimeBootstrap {
        regime,
        standard_error: welford.standard_error(),
        replicate_mean: welford.mean(),
        n_valid: welford.count(),
        n_undefined,
        n_failed,
        degenerate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{ColumnMap, SubjectVisit};
    use crate::weights::{UniformWeights, WeightSpec};
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn paths_panel(paths: &[&[bool]]) -> Panel {
        let records = paths
            .iter()
            .enumerate()
            .flat_map(|(id, path)| {
                path.iter()
                    .enumerate()
                    .map(move |(t, &trt)| SubjectVisit::new(id as i64 + 1, t as u32, trt))
            })
            .collect();
        Panel::new(records, vec![]).unwrap()
    }

    fn mixed_panel() -> Panel {
        paths_panel(&[
            &[false, false, true],
            &[false, true, true],
            &[false, false, false],
            &[false, false, true],
            &[false, false],
            &[false, true],
            &[true, true, true],
            &[false, false, true],
        ])
    }

    fn spec() -> WeightSpec {
        WeightSpec::from_columns(&ColumnMap::default())
    }

    fn config(iterations: usize, seed: u64) -> BootstrapConfig {
        BootstrapConfig {
            iterations,
            seed: Some(seed),
            ..BootstrapConfig::default()
        }
    }

    #[test]
    fn test_build_cluster_indices_basic() {
        let result = build_cluster_indices(&[1, 1, 2, 2, 2]);

        assert_eq!(result.n_clusters, 2);
        assert_eq!(result.indices[0], vec![0, 1]);
        assert_eq!(result.indices[1], vec![2, 3, 4]);
    }

    #[test]
    fn test_build_cluster_indices_noncontiguous_ids() {
        let result = build_cluster_indices(&[100, 200, 100, 300, 200]);

        assert_eq!(result.n_clusters, 3);
        assert_eq!(result.indices[0], vec![0, 2]); // cluster 100
        assert_eq!(result.indices[1], vec![1, 4]); // cluster 200
        assert_eq!(result.indices[2], vec![3]); // cluster 300
    }

    #[test]
    fn test_draws_number_duplicate_copies() {
        let panel = mixed_panel();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let draws = draw_subjects(panel.subjects(), &mut rng);

        assert_eq!(draws.len(), panel.n_subjects());
        let mut counts: HashMap<i64, u32> = HashMap::new();
        for d in &draws {
            let c = counts.entry(d.subject_id).or_insert(0);
            assert_eq!(d.copy, *c);
            *c += 1;
        }
    }

    #[test]
    fn test_expand_replays_each_draw_separately() {
        let panel = mixed_panel();
        let index = ReplayIndex::new(&panel);
        let draws = vec![
            Draw { subject_id: 2, copy: 0 },
            Draw { subject_id: 2, copy: 1 },
            Draw { subject_id: 5, copy: 0 },
        ];
        let sample = index.expand(&panel, &draws);

        assert_eq!(sample.panel.n_subjects(), 3);
        assert_eq!(sample.panel.subjects()[0].len(), 3);
        assert_eq!(sample.panel.subjects()[1].len(), 3);
        // subject 5 was only followed for two visits
        assert_eq!(sample.panel.subjects()[2].len(), 2);
        let ids: Vec<i64> = sample.panel.subjects().iter().map(|s| s.subject_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(sample.origin, vec![3, 4, 5, 3, 4, 5, 12, 13]);
        assert_eq!(
            sample.panel.records()[4].treated,
            panel.records()[4].treated
        );
    }

    #[test]
    fn test_expand_sparse_visit_times() {
        let records = vec![
            SubjectVisit::new(1, 0, false),
            SubjectVisit::new(1, 200_000_000, true),
            SubjectVisit::new(2, 0, false),
        ];
        let panel = Panel::new(records, vec![]).unwrap();
        let index = ReplayIndex::new(&panel);
        let draws = vec![
            Draw { subject_id: 1, copy: 0 },
            Draw { subject_id: 2, copy: 0 },
            Draw { subject_id: 1, copy: 1 },
        ];
        let sample = index.expand(&panel, &draws);

        assert_eq!(sample.panel.n_records(), 5);
        assert_eq!(sample.origin, vec![0, 1, 2, 0, 1]);
        let times: Vec<u32> = sample.panel.records().iter().map(|r| r.visit_time).collect();
        assert_eq!(times, vec![0, 200_000_000, 0, 0, 200_000_000]);

        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };
        let summary =
            run_bootstrap(&panel, ctx, &[Regime::TreatFrom(1)], &config(10, 3)).unwrap();
        assert_eq!(summary.replicates.len(), 10);
    }

    #[test]
    fn test_bootstrap_reproducibility() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };
        let regimes = [Regime::TreatFrom(1), Regime::TreatFrom(2), Regime::Never];

        let first = run_bootstrap(&panel, ctx, &regimes, &config(50, 42)).unwrap();
        let second = run_bootstrap(&panel, ctx, &regimes, &config(50, 42)).unwrap();

        assert_eq!(first.replicates, second.replicates);
        for (a, b) in first.regimes.iter().zip(&second.regimes) {
            assert_eq!(a.standard_error.to_bits(), b.standard_error.to_bits());
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };
        let regimes = [Regime::TreatFrom(2), Regime::Never];
        let sequential = BootstrapConfig {
            parallel: false,
            ..config(40, 9)
        };

        let a = run_bootstrap(&panel, ctx, &regimes, &config(40, 9)).unwrap();
        let b = run_bootstrap(&panel, ctx, &regimes, &sequential).unwrap();

        assert_eq!(a, b);
        let order: Vec<usize> = a.replicates.iter().map(|r| r.index).collect();
        assert_eq!(order, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_iteration_is_degenerate() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };

        let summary = run_bootstrap(&panel, ctx, &[Regime::Never], &config(1, 3)).unwrap();
        let regime = &summary.regimes[0];
        assert!(regime.degenerate);
        assert!(regime.standard_error.is_nan());
        assert_eq!(regime.n_valid + regime.n_undefined, 1);
    }

    #[test]
    fn test_impossible_regime_counts_undefined_replicates() {
        // nobody is treated at baseline, so TreatFrom(0) never has compliers
        let panel = paths_panel(&[&[false, true], &[false, false], &[false]]);
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };

        let summary =
            run_bootstrap(&panel, ctx, &[Regime::TreatFrom(0)], &config(20, 11)).unwrap();
        let regime = &summary.regimes[0];
        assert_eq!(regime.n_undefined, 20);
        assert_eq!(regime.n_valid, 0);
        assert!(regime.degenerate);
        assert!(regime.standard_error.is_nan());
    }

    #[test]
    fn test_constant_outcome_has_zero_se() {
        // every subject is treated from visit 1 onwards
        let panel = paths_panel(&[&[false, true], &[false, true, true], &[false, true]]);
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };

        let summary =
            run_bootstrap(&panel, ctx, &[Regime::TreatFrom(1)], &config(25, 5)).unwrap();
        assert_relative_eq!(summary.regimes[0].standard_error, 0.0);
        assert_relative_eq!(summary.regimes[0].replicate_mean, 1.0);
        assert_eq!(summary.regimes[0].n_valid, 25);
        // a zero SE reflects no replicate variability, not precision
        assert!(summary.regimes[0].degenerate);
    }

    #[test]
    fn test_varying_outcome_is_not_degenerate() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };

        let summary =
            run_bootstrap(&panel, ctx, &[Regime::TreatFrom(2)], &config(200, 13)).unwrap();
        assert!(summary.regimes[0].standard_error > 0.0);
        assert!(!summary.regimes[0].degenerate);
    }

    #[test]
    fn test_insufficient_clusters() {
        let panel = paths_panel(&[&[false, true]]);
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };
        let err = run_bootstrap(&panel, ctx, &[Regime::Never], &config(10, 1)).unwrap_err();
        assert_eq!(err, BootstrapError::InsufficientClusters { found: 1 });
    }

    #[test]
    fn test_rejects_zero_iterations_and_empty_regimes() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let ctx = WeightContext {
            provider: &UniformWeights,
            spec: &spec(),
            observed: &observed,
        };
        assert_eq!(
            run_bootstrap(&panel, ctx, &[Regime::Never], &config(0, 1)).unwrap_err(),
            BootstrapError::NoIterations
        );
        assert_eq!(
            run_bootstrap(&panel, ctx, &[], &config(5, 1)).unwrap_err(),
            BootstrapError::NoRegimes
        );
    }

    struct CountingProvider {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl WeightProvider for CountingProvider {
        fn fit(&self, panel: &Panel, _spec: &WeightSpec) -> Result<Vec<f64>, WeightError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(call) {
                return Err(WeightError::RefitUnsupported("synthetic failure".into()));
            }
            Ok(vec![2.0; panel.n_records()])
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_refit_policy_refits_every_replicate() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail_on: None,
        };
        let ctx = WeightContext {
            provider: &provider,
            spec: &spec(),
            observed: &observed,
        };
        let cfg = BootstrapConfig {
            weight_policy: WeightPolicy::Refit,
            ..config(12, 4)
        };

        let summary = run_bootstrap(&panel, ctx, &[Regime::TreatFrom(2)], &cfg).unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 12);
        assert_eq!(summary.regimes[0].n_failed, 0);
    }

    #[test]
    fn test_failed_refit_is_recorded_not_fatal() {
        let panel = mixed_panel();
        let observed = vec![1.0; panel.n_records()];
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail_on: Some(0),
        };
        let ctx = WeightContext {
            provider: &provider,
            spec: &spec(),
            observed: &observed,
        };
        let cfg = BootstrapConfig {
            weight_policy: WeightPolicy::Refit,
            parallel: false,
            ..config(6, 4)
        };

        let summary = run_bootstrap(&panel, ctx, &[Regime::Never], &cfg).unwrap();
        assert_eq!(summary.regimes[0].n_failed, 1);
        assert!(summary.replicates[0].failure.is_some());
        assert_eq!(
            summary.regimes[0].n_valid + summary.regimes[0].n_undefined,
            5
        );
    }
}
