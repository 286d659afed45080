//! Boundary to the accelerator-resident simulation engine.

use learning::{ShapeMismatchErr, TensorSpec};

/// Explicit simulation clock, owned by the driver and handed to the engine
/// each step.
///
/// This replaces ambient process-wide time/step counters: the driver holds
/// exactly one context per run, ticks it after every engine advance and
/// rewinds it at epoch boundaries.
#[derive(Debug, Clone, Copy)]
pub struct SimulationContext {
    step: u64,
    time_ms: f32,
    timestep_ms: f32,
}

impl SimulationContext {
    pub fn new(timestep_ms: f32) -> Self {
        Self {
            step: 0,
            time_ms: 0.0,
            timestep_ms,
        }
    }

    #[inline]
    pub fn step(&self) -> u64 {
        self.step
    }

    #[inline]
    pub fn time_ms(&self) -> f32 {
        self.time_ms
    }

    #[inline]
    pub fn timestep_ms(&self) -> f32 {
        self.timestep_ms
    }

    /// Advances the clock by one timestep.
    #[inline]
    pub fn tick(&mut self) {
        self.step += 1;
        self.time_ms += self.timestep_ms;
    }

    /// Rewinds to time zero (epoch boundary).
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
        self.time_ms = 0.0;
    }
}

/// The network simulation consumed by the training loop.
///
/// The per-timestep state-update equations live entirely behind this trait;
/// the driver only presents trials, advances the clock, reads the readout
/// and moves flat buffers across the host/device boundary.
///
/// `tensors` lists the primary parameter tensors in a fixed order that must
/// be identical on every rank — it drives both the reduction and the
/// optimizer phase. Mirror twins are not registry entries; they are
/// addressed by name through the transfer methods.
///
/// Transfer contract: `pull_*`/`push_*` copy whole tensors and fail with a
/// shape mismatch when the host staging length differs from the engine's
/// tensor — a programming-contract violation treated as fatal.
pub trait SimulationEngine {
    fn tensors(&self) -> &[TensorSpec];

    /// Presents training example `example` for the next trial.
    fn begin_trial(&mut self, ctx: &SimulationContext, example: usize);

    /// Advances network state by one timestep.
    fn advance_timestep(&mut self, ctx: &SimulationContext);

    /// Per-class readout at the current timestep.
    fn readout(&self) -> &[f32];

    /// Clears every gradient accumulator (start of a batch).
    fn zero_gradients(&mut self);

    fn pull_gradient(&mut self, name: &str, out: &mut [f32]) -> Result<(), ShapeMismatchErr>;

    fn pull_parameter(&mut self, name: &str, out: &mut [f32]) -> Result<(), ShapeMismatchErr>;

    fn push_parameter(&mut self, name: &str, host: &[f32]) -> Result<(), ShapeMismatchErr>;
}
