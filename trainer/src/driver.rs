//! The distributed training loop: epochs → batches → trials → timesteps.

use std::time::Instant;

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use collective::Collective;
use learning::{Adam, CheckpointStore, MomentPair, TensorSpec};

use crate::{
    config::TrainConfig,
    error::{Result, TrainErr},
    metrics::TrainMetrics,
    report::ProgressReport,
    sim::{SimulationContext, SimulationEngine},
    topology::{RankTopology, slice_range},
};

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub epochs_run: usize,
    pub batches_per_epoch: usize,
    /// Globally summed correct count of the final batch.
    pub last_correct: usize,
    /// Global trial count of the final batch.
    pub last_trials: usize,
}

/// Drives one rank of the distributed run.
///
/// Collective discipline: per batch this issues exactly one
/// `all_reduce_sum` per registry tensor, in registry order, plus one for
/// the correct count — on every rank, every batch, including batches where
/// this rank's slice is already exhausted. Breaking that order or count on
/// any rank blocks the whole group forever, so no code path below skips a
/// reduction conditionally on rank-local state.
pub struct TrainingLoop<E> {
    cfg: TrainConfig,
    topo: RankTopology,
    engine: E,
    channel: Collective,
    labels: Vec<u8>,

    registry: Vec<TensorSpec>,
    adam: Adam,
    moments: Vec<MomentPair>,
    store: CheckpointStore,
    report: Option<ProgressReport>,

    // Persistent host staging, reused across batches.
    grad: Vec<f32>,
    param: Vec<f32>,
    mirror: Vec<f32>,
    scores: Vec<f32>,

    metrics: TrainMetrics,
}

impl<E: SimulationEngine> TrainingLoop<E> {
    pub fn new(
        cfg: TrainConfig,
        topo: RankTopology,
        engine: E,
        channel: Collective,
        labels: Vec<u8>,
    ) -> Result<Self> {
        cfg.validate()?;

        if channel.rank() != topo.rank() || channel.num_ranks() != topo.num_ranks() {
            return Err(TrainErr::Config {
                reason: format!(
                    "collective group ({}/{}) disagrees with topology ({}/{})",
                    channel.rank(),
                    channel.num_ranks(),
                    topo.rank(),
                    topo.num_ranks()
                ),
            });
        }

        let classes = cfg.network.classes.get();
        if let Some(bad) = labels.iter().find(|&&l| usize::from(l) >= classes) {
            return Err(TrainErr::Config {
                reason: format!("label {bad} exceeds the {classes}-class readout"),
            });
        }

        let registry = engine.tensors().to_vec();
        let moments = registry
            .iter()
            .map(|spec| MomentPair::zeros(spec.element_count()))
            .collect();
        let store = CheckpointStore::new(&cfg.checkpoint_dir)?;
        let report = if topo.is_coordinator() {
            Some(ProgressReport::open(&cfg.report)?)
        } else {
            None
        };

        Ok(Self {
            scores: vec![0.0; classes],
            cfg,
            topo,
            engine,
            channel,
            labels,
            registry,
            adam: Adam::default(),
            moments,
            store,
            report,
            grad: Vec::new(),
            param: Vec::new(),
            mirror: Vec::new(),
            metrics: TrainMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &TrainMetrics {
        &self.metrics
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Runs the configured number of epochs and returns the summary.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let total = self.labels.len();
        let slice = self.topo.slice(total)?;
        let rank_batch = self.cfg.rank_batch_size(self.topo.num_ranks())?;

        // Identical on every rank: derived from the largest (last) slice,
        // so ranks with smaller slices still run the same number of batch
        // iterations and the collective sequence stays in lock-step.
        let last_slice = slice_range(total, self.topo.num_ranks() - 1, self.topo.num_ranks());
        let num_batches = last_slice.len().div_ceil(rank_batch);

        info!(
            rank = self.topo.rank(),
            examples = slice.len(),
            batches = num_batches;
            "rank slice resolved"
        );

        let start_epoch = self.restore()?;
        self.init_mirrors()?;

        let mut indices: Vec<usize> = slice.collect();
        let mut rng =
            StdRng::seed_from_u64(self.cfg.seed.unwrap_or(0).wrapping_add(self.topo.rank() as u64));
        let mut ctx = SimulationContext::new(self.cfg.timestep_ms);

        let mut last_correct = 0;
        let mut last_trials = 0;
        for epoch in start_epoch..self.cfg.epochs.get() {
            info!(rank = self.topo.rank(), epoch = epoch; "starting epoch");
            ctx.reset();
            indices.shuffle(&mut rng);
            let lr = self.cfg.learning_rate * self.cfg.lr_decay_per_epoch.powi(epoch as i32);

            for batch in 0..num_batches {
                let (correct, trials) = self
                    .run_batch(&mut ctx, &indices, epoch, batch, num_batches, rank_batch, lr, total)
                    .await?;
                last_correct = correct;
                last_trials = trials;
            }

            if self.topo.is_coordinator() && (epoch + 1) % self.cfg.checkpoint_interval.get() == 0 {
                self.save_checkpoint(epoch)?;
            }
            self.metrics.bump_epoch();
        }

        Ok(RunSummary {
            epochs_run: self.cfg.epochs.get().saturating_sub(start_epoch),
            batches_per_epoch: num_batches,
            last_correct,
            last_trials,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &mut self,
        ctx: &mut SimulationContext,
        indices: &[usize],
        epoch: usize,
        batch: usize,
        num_batches: usize,
        rank_batch: usize,
        lr: f32,
        total: usize,
    ) -> Result<(usize, usize)> {
        self.engine.zero_gradients();

        let lo = (batch * rank_batch).min(indices.len());
        let hi = (lo + rank_batch).min(indices.len());

        let sim_start = Instant::now();
        let mut correct = 0usize;
        for &example in &indices[lo..hi] {
            self.engine.begin_trial(ctx, example);
            self.scores.fill(0.0);

            for ts in 0..self.cfg.timesteps_per_trial.get() {
                self.engine.advance_timestep(ctx);
                ctx.tick();

                if ts >= self.cfg.response_start {
                    let out = self.engine.readout();
                    debug_assert_eq!(out.len(), self.scores.len());
                    for (score, &o) in self.scores.iter_mut().zip(out) {
                        *score += o;
                    }
                }
            }

            if usize::from(self.labels[example]) == argmax(&self.scores) {
                correct += 1;
            }
        }
        self.metrics.add_trials(hi - lo);
        self.metrics.add_sim_time(sim_start.elapsed());

        self.reduce_and_step(epoch, batch, num_batches, lr).await?;

        // Accuracy aggregation: one length-1 reduction for the correct
        // count. The denominator comes from the deterministic slice
        // arithmetic, so no second collective is needed and the percentage
        // uses every rank's true per-slice trial count.
        let mut acc = [correct as f32];
        self.channel
            .all_reduce_sum(&mut acc)
            .await
            .map_err(|source| TrainErr::Collective {
                rank: self.topo.rank(),
                epoch,
                batch,
                op: "reduce correct count".to_string(),
                source,
            })?;
        let global_correct = acc[0] as usize;
        let global_trials = global_trials_in_batch(total, self.topo.num_ranks(), rank_batch, batch);

        info!(
            rank = self.topo.rank(),
            epoch = epoch,
            batch = batch;
            "batch {}/{}: {global_correct}/{global_trials} correct",
            batch + 1,
            num_batches
        );
        if let Some(report) = &mut self.report {
            report.append(epoch, batch, global_trials, global_correct)?;
        }

        self.metrics.bump_batch();
        Ok((global_correct, global_trials))
    }

    /// Reduces every gradient accumulator and applies the optimizer, in
    /// the registry's fixed order.
    async fn reduce_and_step(
        &mut self,
        epoch: usize,
        batch: usize,
        num_batches: usize,
        lr: f32,
    ) -> Result<()> {
        // One-based and derived from the global batch counter, so the
        // bias-correction factors match on every rank and across resumes.
        let step_index = (epoch * num_batches + batch + 1) as u64;
        let start = Instant::now();

        let Self {
            registry,
            engine,
            channel,
            topo,
            grad,
            param,
            mirror,
            moments,
            adam,
            ..
        } = self;

        for (spec, moment) in registry.iter().zip(moments.iter_mut()) {
            let n = spec.element_count();
            grad.resize(n, 0.0);
            param.resize(n, 0.0);

            engine.pull_gradient(&spec.name, grad)?;
            channel
                .all_reduce_sum(grad)
                .await
                .map_err(|source| TrainErr::Collective {
                    rank: topo.rank(),
                    epoch,
                    batch,
                    op: format!("reduce {}", spec.name),
                    source,
                })?;

            engine.pull_parameter(&spec.name, param)?;
            match &spec.mirror {
                None => adam.step(grad, moment, param, step_index, lr)?,
                Some(mirror_name) => {
                    mirror.resize(n, 0.0);
                    adam.step_transposed(
                        grad, moment, param, mirror, spec.rows, spec.cols, step_index, lr,
                    )?;
                    engine.push_parameter(mirror_name, mirror)?;
                }
            }
            engine.push_parameter(&spec.name, param)?;
        }

        self.metrics.add_reduce_time(start.elapsed());
        Ok(())
    }

    /// Loads parameters from the resume checkpoint, if one was requested.
    /// Returns the epoch to start from.
    ///
    /// Only parameters are restored; optimizer moments deliberately restart
    /// from zero while the step index continues from the global batch
    /// counter.
    fn restore(&mut self) -> Result<usize> {
        let Some(resume) = self.cfg.resume_epoch else {
            return Ok(0);
        };

        let Self {
            registry,
            engine,
            store,
            param,
            ..
        } = self;

        for spec in registry.iter() {
            param.resize(spec.element_count(), 0.0);
            store.load_into(&spec.name, resume, param)?;
            engine.push_parameter(&spec.name, param)?;
        }

        info!(rank = self.topo.rank(), epoch = resume; "resumed from checkpoint");
        Ok(resume + 1)
    }

    /// Rewrites every mirror tensor as the exact transpose of its primary.
    /// Runs once at startup, for fresh and resumed runs alike.
    fn init_mirrors(&mut self) -> Result<()> {
        let Self {
            registry,
            engine,
            param,
            mirror,
            ..
        } = self;

        for spec in registry.iter() {
            let Some(mirror_name) = &spec.mirror else {
                continue;
            };

            let n = spec.element_count();
            param.resize(n, 0.0);
            mirror.resize(n, 0.0);

            engine.pull_parameter(&spec.name, param)?;
            for r in 0..spec.rows {
                for c in 0..spec.cols {
                    mirror[c * spec.rows + r] = param[r * spec.cols + c];
                }
            }
            engine.push_parameter(mirror_name, mirror)?;

            debug!(tensor = mirror_name.as_str(); "mirror derived");
        }

        Ok(())
    }

    /// Coordinator-only: snapshot every primary tensor for `epoch`. Mirrors
    /// are not saved; they are re-derived from the primaries on resume.
    fn save_checkpoint(&mut self, epoch: usize) -> Result<()> {
        let Self {
            registry,
            engine,
            store,
            param,
            ..
        } = self;

        for spec in registry.iter() {
            param.resize(spec.element_count(), 0.0);
            engine.pull_parameter(&spec.name, param)?;
            store.save(&spec.name, epoch, param)?;
        }

        info!(rank = self.topo.rank(), epoch = epoch; "checkpoint saved");
        Ok(())
    }
}

/// Index of the maximum score; ties resolve to the lowest index.
fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, &s) in scores.iter().enumerate().skip(1) {
        if s > scores[best] {
            best = i;
        }
    }
    best
}

/// Number of trials one rank contributes to `batch`, given its slice size.
fn trials_in_batch(slice_len: usize, rank_batch: usize, batch: usize) -> usize {
    let lo = (batch * rank_batch).min(slice_len);
    (slice_len - lo).min(rank_batch)
}

/// Total trials across every rank for `batch`, from the deterministic
/// slice arithmetic.
fn global_trials_in_batch(total: usize, num_ranks: usize, rank_batch: usize, batch: usize) -> usize {
    (0..num_ranks)
        .map(|rank| trials_in_batch(slice_range(total, rank, num_ranks).len(), rank_batch, batch))
        .sum()
}
