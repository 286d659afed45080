//! Host-memory reference network used by the binary and end-to-end tests.
//!
//! A compact leaky recurrent rate model standing in for the
//! accelerator-resident simulation: input drive flows through an
//! input→hidden dense connection, a hidden→hidden recurrent connection and
//! a hidden→output readout with bias. The output weights exist in both
//! orientations — the forward copy produces the readout, the transposed
//! copy carries the error signal back into the hidden layer — which is
//! exactly the mirror pair the optimizer keeps consistent. Gradients
//! accumulate every timestep as outer products of the error signal and the
//! presynaptic activity. It exists so the training loop has a concrete
//! collaborator; it is not a model of record.

use rand::{Rng, SeedableRng, rngs::StdRng};

use learning::{ShapeMismatchErr, TensorSpec};

use crate::{
    config::NetworkConfig,
    sim::{SimulationContext, SimulationEngine},
};

pub const INPUT_HIDDEN: &str = "input_hidden";
pub const HIDDEN_HIDDEN: &str = "hidden_hidden";
pub const HIDDEN_OUTPUT: &str = "hidden_output";
pub const OUTPUT_HIDDEN: &str = "output_hidden";
pub const OUTPUT_BIAS: &str = "output_bias";

const LEAK: f32 = 0.3;
const INIT_SCALE: f32 = 0.1;

pub struct RateEngine {
    specs: Vec<TensorSpec>,
    inputs: usize,
    hidden: usize,
    classes: usize,

    w_in: Vec<f32>,
    w_rec: Vec<f32>,
    w_out: Vec<f32>,
    w_out_t: Vec<f32>,
    bias: Vec<f32>,

    g_in: Vec<f32>,
    g_rec: Vec<f32>,
    g_out: Vec<f32>,
    g_bias: Vec<f32>,

    x: Vec<f32>,
    h: Vec<f32>,
    h_prev: Vec<f32>,
    y: Vec<f32>,
    err: Vec<f32>,

    example: usize,
    trial_step: u64,
}

impl RateEngine {
    /// Builds the network from `net`, seeding the weight initialization
    /// with `seed`. Every rank must pass the same seed so the group starts
    /// from identical parameters.
    pub fn new(net: &NetworkConfig, seed: u64) -> Self {
        let inputs = net.inputs.get();
        let hidden = net.hidden.get();
        let classes = net.classes.get();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut init = |len: usize| -> Vec<f32> {
            (0..len)
                .map(|_| rng.random_range(-INIT_SCALE..INIT_SCALE))
                .collect()
        };

        Self {
            specs: vec![
                TensorSpec::new(INPUT_HIDDEN, inputs, hidden),
                TensorSpec::new(HIDDEN_HIDDEN, hidden, hidden),
                TensorSpec::with_mirror(HIDDEN_OUTPUT, hidden, classes, OUTPUT_HIDDEN),
                TensorSpec::new(OUTPUT_BIAS, classes, 1),
            ],
            inputs,
            hidden,
            classes,
            w_in: init(inputs * hidden),
            w_rec: init(hidden * hidden),
            w_out: init(hidden * classes),
            // Derived from the forward copy by the driver at startup.
            w_out_t: vec![0.0; classes * hidden],
            bias: init(classes),
            g_in: vec![0.0; inputs * hidden],
            g_rec: vec![0.0; hidden * hidden],
            g_out: vec![0.0; hidden * classes],
            g_bias: vec![0.0; classes],
            x: vec![0.0; inputs],
            h: vec![0.0; hidden],
            h_prev: vec![0.0; hidden],
            y: vec![0.0; classes],
            err: vec![0.0; classes],
            example: 0,
            trial_step: 0,
        }
    }

    /// Deterministic pseudo-random input drive in `[0, 1)` for one
    /// (example, timestep, channel) triple. Stands in for decoded stimulus
    /// data, which is outside this crate's scope.
    fn drive(example: usize, step: u64, channel: usize) -> f32 {
        let mut z = (example as u64)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ step.wrapping_mul(0xbf58_476d_1ce4_e5b9)
            ^ (channel as u64).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        z = z.wrapping_mul(0xd6e8_feb8_6659_fd93);
        z ^= z >> 27;
        (z >> 40) as f32 / (1u64 << 24) as f32
    }

    fn param_buffer(&self, name: &str) -> Option<&Vec<f32>> {
        match name {
            INPUT_HIDDEN => Some(&self.w_in),
            HIDDEN_HIDDEN => Some(&self.w_rec),
            HIDDEN_OUTPUT => Some(&self.w_out),
            OUTPUT_HIDDEN => Some(&self.w_out_t),
            OUTPUT_BIAS => Some(&self.bias),
            _ => None,
        }
    }

    fn param_buffer_mut(&mut self, name: &str) -> Option<&mut Vec<f32>> {
        match name {
            INPUT_HIDDEN => Some(&mut self.w_in),
            HIDDEN_HIDDEN => Some(&mut self.w_rec),
            HIDDEN_OUTPUT => Some(&mut self.w_out),
            OUTPUT_HIDDEN => Some(&mut self.w_out_t),
            OUTPUT_BIAS => Some(&mut self.bias),
            _ => None,
        }
    }

    fn grad_buffer(&self, name: &str) -> Option<&Vec<f32>> {
        match name {
            INPUT_HIDDEN => Some(&self.g_in),
            HIDDEN_HIDDEN => Some(&self.g_rec),
            HIDDEN_OUTPUT => Some(&self.g_out),
            OUTPUT_BIAS => Some(&self.g_bias),
            _ => None,
        }
    }
}

fn copy_checked(name: &str, src: Option<&[f32]>, dst: &mut [f32]) -> Result<(), ShapeMismatchErr> {
    let src = src.unwrap_or(&[]);
    if src.len() != dst.len() {
        return Err(ShapeMismatchErr {
            tensor: name.to_string(),
            got: src.len(),
            expected: dst.len(),
        });
    }
    dst.copy_from_slice(src);
    Ok(())
}

impl SimulationEngine for RateEngine {
    fn tensors(&self) -> &[TensorSpec] {
        &self.specs
    }

    fn begin_trial(&mut self, _ctx: &SimulationContext, example: usize) {
        self.example = example;
        self.trial_step = 0;
        self.h.fill(0.0);
        self.h_prev.fill(0.0);
        self.y.fill(0.0);
    }

    fn advance_timestep(&mut self, _ctx: &SimulationContext) {
        for i in 0..self.inputs {
            self.x[i] = Self::drive(self.example, self.trial_step, i);
        }

        self.h_prev.copy_from_slice(&self.h);
        for j in 0..self.hidden {
            let mut acc = 0.0f32;
            for i in 0..self.inputs {
                acc += self.w_in[i * self.hidden + j] * self.x[i];
            }
            for k in 0..self.hidden {
                acc += self.w_rec[k * self.hidden + j] * self.h_prev[k];
            }
            self.h[j] = (1.0 - LEAK) * self.h_prev[j] + LEAK * acc.tanh();
        }

        for k in 0..self.classes {
            let mut acc = self.bias[k];
            for j in 0..self.hidden {
                acc += self.w_out[j * self.classes + k] * self.h[j];
            }
            self.y[k] = acc;
        }

        // Stand-in supervision: the trial's target class is derived from
        // the example index, matching the demo label layout.
        let target = self.example % self.classes;
        for k in 0..self.classes {
            let wanted = if k == target { 1.0 } else { 0.0 };
            self.err[k] = self.y[k] - wanted;
        }

        for k in 0..self.classes {
            self.g_bias[k] += self.err[k];
        }
        for j in 0..self.hidden {
            for k in 0..self.classes {
                self.g_out[j * self.classes + k] += self.err[k] * self.h[j];
            }
        }

        // The error flows back through the transposed orientation; this is
        // the read side of the mirror pair.
        for j in 0..self.hidden {
            let mut delta = 0.0f32;
            for k in 0..self.classes {
                delta += self.err[k] * self.w_out_t[k * self.hidden + j];
            }
            for i in 0..self.inputs {
                self.g_in[i * self.hidden + j] += delta * self.x[i];
            }
            for k in 0..self.hidden {
                self.g_rec[k * self.hidden + j] += delta * self.h_prev[k];
            }
        }

        self.trial_step += 1;
    }

    fn readout(&self) -> &[f32] {
        &self.y
    }

    fn zero_gradients(&mut self) {
        self.g_in.fill(0.0);
        self.g_rec.fill(0.0);
        self.g_out.fill(0.0);
        self.g_bias.fill(0.0);
    }

    fn pull_gradient(&mut self, name: &str, out: &mut [f32]) -> Result<(), ShapeMismatchErr> {
        copy_checked(name, self.grad_buffer(name).map(Vec::as_slice), out)
    }

    fn pull_parameter(&mut self, name: &str, out: &mut [f32]) -> Result<(), ShapeMismatchErr> {
        copy_checked(name, self.param_buffer(name).map(Vec::as_slice), out)
    }

    fn push_parameter(&mut self, name: &str, host: &[f32]) -> Result<(), ShapeMismatchErr> {
        let expected = host.len();
        match self.param_buffer_mut(name) {
            Some(buf) if buf.len() == expected => {
                buf.copy_from_slice(host);
                Ok(())
            }
            Some(buf) => Err(ShapeMismatchErr {
                tensor: name.to_string(),
                got: buf.len(),
                expected,
            }),
            None => Err(ShapeMismatchErr {
                tensor: name.to_string(),
                got: 0,
                expected,
            }),
        }
    }
}
