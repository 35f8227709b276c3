//! Build or reuse every master of one kind for one (period, ccd).
//!
//! Each group moves `Unbuilt -> Building -> Built` or `Building -> Failed`.
//! A failed group keeps its error for reporting and never aborts its
//! siblings. When an artifact for the group already exists and the run
//! does not ask to reprocess, the group is loaded instead of rebuilt.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::consts::MIN_GROUP_FRAMES;
use crate::correct::CorrectionSet;
use crate::error::{DetrendError, Result};
use crate::frame::{CalibrationKind, FilterBand, FrameCollection, GroupKey, MasterFrame};
use crate::io::{ArtifactKey, ArtifactStore, CalibrationRecord, FrameLoader, MetadataSource};
use crate::period::{normalize_day, Period};

use super::builder::{load_master, BiasRules, CalibParams, CalibrationBuilder, FlatRules, KindProfile};
use super::illumination::group_by_filter;

/// Collaborators a calibration build reads from and writes to.
#[derive(Clone, Copy)]
pub struct CalibContext<'a> {
    pub metadata: &'a dyn MetadataSource,
    pub loader: &'a dyn FrameLoader,
    pub store: &'a dyn ArtifactStore,
    pub corrections: &'a CorrectionSet,
}

#[derive(Clone, Debug)]
pub enum GroupState {
    Unbuilt,
    Building,
    Built(Arc<MasterFrame>),
    Failed(String),
}

/// How a built group got its master.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    Combined,
    Loaded,
}

/// Result of one `build_all` call.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub combined: usize,
    pub loaded: usize,
    /// Groups removed for having too few frames.
    pub dropped: Vec<GroupKey>,
    pub failed: Vec<(GroupKey, DetrendError)>,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn the first failure into an error.
    pub fn into_result(mut self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            let (_, err) = self.failed.remove(0);
            Err(err)
        }
    }
}

struct GroupPlan {
    records: Vec<CalibrationRecord>,
    leds: Vec<i64>,
}

pub struct CalibrationPipeline {
    profile: KindProfile,
    params: CalibParams,
    period: Period,
    ccd: u8,
    groups: BTreeMap<GroupKey, GroupState>,
    combinations: AtomicUsize,
    parallel: bool,
}

impl CalibrationPipeline {
    pub fn new(kind: CalibrationKind, period: Period, ccd: u8, params: CalibParams) -> Self {
        Self {
            profile: KindProfile::for_kind(kind),
            params,
            period,
            ccd,
            groups: BTreeMap::new(),
            combinations: AtomicUsize::new(0),
            parallel: true,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn kind(&self) -> CalibrationKind {
        self.profile.kind
    }

    pub fn ccd(&self) -> u8 {
        self.ccd
    }

    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Number of times the combination engine ran in this pipeline.
    pub fn combinations(&self) -> usize {
        self.combinations.load(Ordering::Relaxed)
    }

    pub fn state(&self, key: &GroupKey) -> GroupState {
        self.groups.get(key).cloned().unwrap_or(GroupState::Unbuilt)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &GroupState)> {
        self.groups.iter()
    }

    /// Filter bands with a built master, for flats.
    pub fn built_filters(&self) -> Vec<FilterBand> {
        self.groups
            .iter()
            .filter(|(_, s)| matches!(s, GroupState::Built(_)))
            .filter_map(|(k, _)| k.filter)
            .collect()
    }

    /// Enumerate the period's groups and build or load each one.
    ///
    /// Flats take the bias pipeline of the same period and ccd; each flat
    /// group is bias-subtracted with its day's master. Grouping errors
    /// (an unknown LED id) fail the whole call; per-group errors land in
    /// the summary.
    pub fn build_all(
        &mut self,
        ctx: CalibContext<'_>,
        reprocess: bool,
        bias: Option<&CalibrationPipeline>,
    ) -> Result<BuildSummary> {
        let kind = self.profile.kind;
        let (plans, dropped) = self.plan_groups(&ctx)?;
        info!(
            kind = %kind,
            period = %self.period,
            ccd = self.ccd,
            groups = plans.len(),
            dropped = dropped.len(),
            "Building calibration masters"
        );

        for key in plans.keys() {
            self.groups.insert(key.clone(), GroupState::Building);
        }

        let this = &*self;
        let run = |(key, plan): (&GroupKey, &GroupPlan)| {
            (key.clone(), this.build_group(&ctx, key, plan, reprocess, bias))
        };
        let results: Vec<(GroupKey, Result<(MasterFrame, BuildOutcome)>)> = if self.parallel {
            plans.par_iter().map(run).collect()
        } else {
            plans.iter().map(run).collect()
        };

        let mut summary = BuildSummary {
            dropped,
            ..BuildSummary::default()
        };
        for (key, result) in results {
            match result {
                Ok((master, outcome)) => {
                    match outcome {
                        BuildOutcome::Combined => summary.combined += 1,
                        BuildOutcome::Loaded => summary.loaded += 1,
                    }
                    self.groups.insert(key, GroupState::Built(Arc::new(master)));
                }
                Err(err) => {
                    warn!(kind = %kind, key = %key, error = %err, "Calibration group failed");
                    self.groups.insert(key.clone(), GroupState::Failed(err.to_string()));
                    summary.failed.push((key, err));
                }
            }
        }
        Ok(summary)
    }

    /// Master for `(day, ccd, [filter])`.
    pub fn get_master(
        &self,
        day: &str,
        ccd: u8,
        filter: Option<FilterBand>,
    ) -> Result<Arc<MasterFrame>> {
        let key = GroupKey {
            period: normalize_day(day),
            ccd,
            filter,
        };
        match self.groups.get(&key) {
            Some(GroupState::Built(master)) => Ok(master.clone()),
            _ => Err(DetrendError::NotBuilt {
                key: format!("{} {key}", self.profile.kind),
            }),
        }
    }

    /// Split the period's raw frames into one plan per group, dropping the
    /// leading `skip_first` frames and groups left too small.
    fn plan_groups(
        &self,
        ctx: &CalibContext<'_>,
    ) -> Result<(BTreeMap<GroupKey, GroupPlan>, Vec<GroupKey>)> {
        let records = ctx
            .metadata
            .calibration_frames(self.profile.kind, &self.period, self.ccd)?;

        let mut by_day: BTreeMap<String, Vec<CalibrationRecord>> = BTreeMap::new();
        for record in records {
            by_day.entry(normalize_day(&record.day)).or_default().push(record);
        }

        let mut raw_groups: Vec<(GroupKey, Vec<CalibrationRecord>)> = Vec::new();
        for (day, records) in by_day {
            let key = GroupKey::new(day, self.ccd);
            match self.profile.kind {
                CalibrationKind::Bias => raw_groups.push((key, records)),
                CalibrationKind::Flat => {
                    for (filter, records) in group_by_filter(records)? {
                        raw_groups.push((key.clone().with_filter(filter), records));
                    }
                }
            }
        }

        let mut plans = BTreeMap::new();
        let mut dropped = Vec::new();
        for (key, records) in raw_groups {
            let records: Vec<CalibrationRecord> =
                records.into_iter().skip(self.params.skip_first).collect();
            if records.len() <= MIN_GROUP_FRAMES {
                warn!(
                    kind = %self.profile.kind,
                    key = %key,
                    frames = records.len(),
                    "Dropping group with too few frames"
                );
                dropped.push(key);
                continue;
            }
            let mut leds: Vec<i64> = records.iter().filter_map(|r| r.led).collect();
            leds.sort_unstable();
            leds.dedup();
            plans.insert(key, GroupPlan { records, leds });
        }
        Ok((plans, dropped))
    }

    fn build_group(
        &self,
        ctx: &CalibContext<'_>,
        key: &GroupKey,
        plan: &GroupPlan,
        reprocess: bool,
        bias: Option<&CalibrationPipeline>,
    ) -> Result<(MasterFrame, BuildOutcome)> {
        let kind = self.profile.kind;
        let artifact_key = ArtifactKey::master(kind, key.clone());

        // Held across the existence check, the build and the write.
        let lock = ctx.store.key_lock(&artifact_key)?;
        let _guard = lock.lock();

        if !reprocess && ctx.store.exists(&artifact_key)? {
            info!(kind = %kind, key = %key, "Loading existing master");
            return Ok((load_master(ctx.store, kind, key)?, BuildOutcome::Loaded));
        }

        info!(kind = %kind, key = %key, frames = plan.records.len(), "Combining master");
        let frames = plan
            .records
            .iter()
            .map(|r| ctx.loader.load(&r.path))
            .collect::<Result<Vec<_>>>()?;
        let collection = FrameCollection::new(key.clone(), frames)?;

        let builder = CalibrationBuilder::new(&self.profile, ctx.corrections, &self.params);
        self.combinations.fetch_add(1, Ordering::Relaxed);
        let master = match kind {
            CalibrationKind::Bias => builder.build(&collection, &BiasRules)?,
            CalibrationKind::Flat => {
                let bias_master = bias
                    .map(|b| b.get_master(&key.period, key.ccd, None))
                    .transpose()?;
                let rules = FlatRules::new(bias_master.as_deref(), plan.leds.clone());
                builder.build(&collection, &rules)?
            }
        };
        let master = builder.persist(ctx.store, master, reprocess)?;
        Ok((master, BuildOutcome::Combined))
    }
}
