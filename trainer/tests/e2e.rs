use std::{collections::HashMap, fs, net::SocketAddr, path::PathBuf};

use collective::Collective;
use learning::{CheckpointStore, ShapeMismatchErr, TensorSpec};
use trainer::{
    RankTopology, TrainConfig,
    driver::TrainingLoop,
    sim::{SimulationContext, SimulationEngine},
};

const FWD: &str = "fwd";
const BWD: &str = "bwd";
const BIAS: &str = "bias";

const FWD_ROWS: usize = 2;
const FWD_COLS: usize = 3;
const BIAS_LEN: usize = 5;
const CLASSES: usize = 10;

/// Deterministic engine: the readout is a one-hot of `example % CLASSES`
/// (so classification always matches the demo label layout) and every
/// trial adds a constant per-rank contribution to each gradient element.
struct MockEngine {
    specs: Vec<TensorSpec>,
    params: HashMap<String, Vec<f32>>,
    grads: HashMap<String, Vec<f32>>,
    readout: Vec<f32>,
    grad_fill: f32,
}

impl MockEngine {
    fn new(grad_fill: f32) -> Self {
        let specs = vec![
            TensorSpec::with_mirror(FWD, FWD_ROWS, FWD_COLS, BWD),
            TensorSpec::new(BIAS, BIAS_LEN, 1),
        ];

        let mut params = HashMap::new();
        params.insert(
            FWD.to_string(),
            (0..FWD_ROWS * FWD_COLS).map(|i| 0.1 * i as f32 + 0.5).collect(),
        );
        params.insert(BWD.to_string(), vec![0.0; FWD_ROWS * FWD_COLS]);
        params.insert(
            BIAS.to_string(),
            (0..BIAS_LEN).map(|i| -0.2 * i as f32).collect(),
        );

        let mut grads = HashMap::new();
        grads.insert(FWD.to_string(), vec![0.0; FWD_ROWS * FWD_COLS]);
        grads.insert(BIAS.to_string(), vec![0.0; BIAS_LEN]);

        Self {
            specs,
            params,
            grads,
            readout: vec![0.0; CLASSES],
            grad_fill,
        }
    }

    fn param(&self, name: &str) -> &[f32] {
        &self.params[name]
    }
}

fn copy_checked(name: &str, src: Option<&Vec<f32>>, out: &mut [f32]) -> Result<(), ShapeMismatchErr> {
    match src {
        Some(buf) if buf.len() == out.len() => {
            out.copy_from_slice(buf);
            Ok(())
        }
        other => Err(ShapeMismatchErr {
            tensor: name.to_string(),
            got: other.map(|b| b.len()).unwrap_or(0),
            expected: out.len(),
        }),
    }
}

impl SimulationEngine for MockEngine {
    fn tensors(&self) -> &[TensorSpec] {
        &self.specs
    }

    fn begin_trial(&mut self, _ctx: &SimulationContext, example: usize) {
        self.readout.fill(0.0);
        self.readout[example % CLASSES] = 1.0;

        for grad in self.grads.values_mut() {
            for g in grad.iter_mut() {
                *g += self.grad_fill;
            }
        }
    }

    fn advance_timestep(&mut self, _ctx: &SimulationContext) {}

    fn readout(&self) -> &[f32] {
        &self.readout
    }

    fn zero_gradients(&mut self) {
        for grad in self.grads.values_mut() {
            grad.fill(0.0);
        }
    }

    fn pull_gradient(&mut self, name: &str, out: &mut [f32]) -> Result<(), ShapeMismatchErr> {
        copy_checked(name, self.grads.get(name), out)
    }

    fn pull_parameter(&mut self, name: &str, out: &mut [f32]) -> Result<(), ShapeMismatchErr> {
        copy_checked(name, self.params.get(name), out)
    }

    fn push_parameter(&mut self, name: &str, host: &[f32]) -> Result<(), ShapeMismatchErr> {
        match self.params.get_mut(name) {
            Some(buf) if buf.len() == host.len() => {
                buf.copy_from_slice(host);
                Ok(())
            }
            other => Err(ShapeMismatchErr {
                tensor: name.to_string(),
                got: other.map(|b| b.len()).unwrap_or(0),
                expected: host.len(),
            }),
        }
    }
}

fn free_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("trainer_{label}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_config(dir: &std::path::Path, epochs: usize, batch_size: usize) -> TrainConfig {
    serde_json::from_value(serde_json::json!({
        "epochs": epochs,
        "batch_size": batch_size,
        "timesteps_per_trial": 4,
        "response_start": 1,
        "network": { "inputs": 2, "hidden": 3, "classes": CLASSES },
        "learning_rate": 0.001,
        "seed": 11,
        "labels": dir.join("labels.bin"),
        "checkpoint_dir": dir.join("checkpoints"),
        "report": dir.join("performance.csv"),
    }))
    .unwrap()
}

fn demo_labels(total: usize) -> Vec<u8> {
    (0..total).map(|i| (i % CLASSES) as u8).collect()
}

type RankResult = (trainer::driver::RunSummary, HashMap<String, Vec<u32>>);

async fn run_rank(
    rank: usize,
    num_ranks: usize,
    addr: SocketAddr,
    cfg: TrainConfig,
    labels: Vec<u8>,
) -> RankResult {
    let topo = RankTopology::new(rank, num_ranks).unwrap();
    let engine = MockEngine::new(0.001 * (rank + 1) as f32);
    let channel = Collective::bootstrap(rank, num_ranks, addr).await.unwrap();

    let mut driver = TrainingLoop::new(cfg, topo, engine, channel, labels).unwrap();
    let summary = driver.run().await.unwrap();

    let engine = driver.into_engine();
    let mut bits = HashMap::new();
    for name in [FWD, BWD, BIAS] {
        bits.insert(
            name.to_string(),
            engine.param(name).iter().map(|p| p.to_bits()).collect(),
        );
    }

    (summary, bits)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn four_ranks_produce_identical_parameters_and_counts() {
    const RANKS: usize = 4;
    const TOTAL: usize = 1000;

    let dir = scratch_dir("four_ranks");
    let addr = free_addr();
    let cfg = test_config(&dir, 1, 40);
    let labels = demo_labels(TOTAL);

    let handles: Vec<_> = (0..RANKS)
        .map(|rank| tokio::spawn(run_rank(rank, RANKS, addr, cfg.clone(), labels.clone())))
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // 1000 examples over 4 ranks with a global batch of 40: each rank runs
    // 10-trial batches, 25 of them, and every batch classifies all 40
    // trials correctly.
    let (reference_summary, reference_bits) = &results[0];
    assert_eq!(reference_summary.batches_per_epoch, 25);
    assert_eq!(reference_summary.last_trials, 40);
    assert_eq!(reference_summary.last_correct, 40);

    for (summary, bits) in &results[1..] {
        assert_eq!(summary.last_correct, reference_summary.last_correct);
        assert_eq!(summary.last_trials, reference_summary.last_trials);
        for name in [FWD, BWD, BIAS] {
            assert_eq!(bits[name], reference_bits[name], "tensor {name} diverged");
        }
    }

    // The mirror is the exact transpose of the primary after every update.
    let fwd = &reference_bits[FWD];
    let bwd = &reference_bits[BWD];
    for r in 0..FWD_ROWS {
        for c in 0..FWD_COLS {
            assert_eq!(fwd[r * FWD_COLS + c], bwd[c * FWD_ROWS + r]);
        }
    }

    // The optimizer really moved the parameters.
    let initial = MockEngine::new(0.0);
    let moved = initial
        .param(FWD)
        .iter()
        .zip(fwd.iter())
        .any(|(a, b)| a.to_bits() != *b);
    assert!(moved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn remainder_slices_keep_lock_step_and_true_denominators() {
    const RANKS: usize = 3;
    const TOTAL: usize = 1000;

    let dir = scratch_dir("remainder");
    let addr = free_addr();
    let cfg = test_config(&dir, 1, 30);
    let labels = demo_labels(TOTAL);

    let handles: Vec<_> = (0..RANKS)
        .map(|rank| tokio::spawn(run_rank(rank, RANKS, addr, cfg.clone(), labels.clone())))
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // Slices are 333/333/334; per-rank batches of 10 mean 34 batch
    // iterations everywhere (the last two exercise the remainder), and the
    // final batch holds 3 + 3 + 4 = 10 trials.
    for (summary, _) in &results {
        assert_eq!(summary.batches_per_epoch, 34);
        assert_eq!(summary.last_trials, 10);
        assert_eq!(summary.last_correct, 10);
    }

    let (_, reference_bits) = &results[0];
    for (_, bits) in &results[1..] {
        for name in [FWD, BWD, BIAS] {
            assert_eq!(bits[name], reference_bits[name], "tensor {name} diverged");
        }
    }

    // The coordinator's report carries the true denominators.
    let report = fs::read_to_string(dir.join("performance.csv")).unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 1 + 34);
    assert_eq!(lines[0], "epoch, batch, trials, correct");
    assert_eq!(lines[1], "0, 0, 30, 30");
    assert_eq!(lines[34], "0, 33, 10, 10");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_continues_the_adam_step_index() {
    const TOTAL: usize = 20;

    let dir = scratch_dir("resume");
    let labels = demo_labels(TOTAL);

    // Reference run: three epochs, one 20-trial batch per epoch, a
    // checkpoint at each epoch boundary.
    let grad_fill = 0.05f32;
    {
        let topo = RankTopology::new(0, 1).unwrap();
        let engine = MockEngine::new(grad_fill);
        let channel = Collective::bootstrap(0, 1, free_addr()).await.unwrap();
        let cfg = test_config(&dir, 3, 20);
        let mut driver = TrainingLoop::new(cfg, topo, engine, channel, labels.clone()).unwrap();
        let summary = driver.run().await.unwrap();
        assert_eq!(summary.epochs_run, 3);
        assert_eq!(summary.batches_per_epoch, 1);
    }

    // The parameters the resumed run must start from.
    let store = CheckpointStore::new(dir.join("checkpoints")).unwrap();
    let mut fwd_before = vec![0.0f32; FWD_ROWS * FWD_COLS];
    store.load_into(FWD, 2, &mut fwd_before).unwrap();

    // Resumed run: epoch 3 only, with moments restarted from zero but the
    // step index continuing at 3 * 1 + 1 = 4.
    let resumed = {
        let topo = RankTopology::new(0, 1).unwrap();
        let engine = MockEngine::new(grad_fill);
        let channel = Collective::bootstrap(0, 1, free_addr()).await.unwrap();
        let mut cfg = test_config(&dir, 4, 20);
        cfg.resume_epoch = Some(2);
        let mut driver = TrainingLoop::new(cfg, topo, engine, channel, labels.clone()).unwrap();
        let summary = driver.run().await.unwrap();
        assert_eq!(summary.epochs_run, 1);
        driver.into_engine()
    };

    // With a constant per-trial gradient and fresh moments, the first
    // post-resume update has a closed form parameterized only by the
    // continued step index. The per-element batch gradient replays the
    // engine's accumulation order.
    let mut batch_grad = 0.0f32;
    for _ in 0..TOTAL {
        batch_grad += grad_fill;
    }
    let g = batch_grad as f64;
    let (beta1, beta2, eps) = (0.9f64, 0.999f64, 1e-8f64);
    let t = 4;
    let m_hat = (1.0 - beta1) * g / (1.0 - beta1.powi(t));
    let v_hat = (1.0 - beta2) * g * g / (1.0 - beta2.powi(t));
    let expected_delta = 0.001 * m_hat / (v_hat.sqrt() + eps);

    for (before, after) in fwd_before.iter().zip(resumed.param(FWD)) {
        let delta = (*before as f64) - (*after as f64);
        assert!(
            (delta - expected_delta).abs() < 1e-6,
            "delta {delta} != expected {expected_delta}"
        );
    }
}
