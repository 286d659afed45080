use std::{env, fs, io, path::PathBuf};

use log::info;

use collective::Collective;
use trainer::{
    RankTopology, TrainConfig, TrainErr,
    driver::TrainingLoop,
    rate::RateEngine,
    topology,
};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other("usage: trainer <config.json>"))?;

    let cfg = TrainConfig::from_file(&config_path)?;
    cfg.validate()?;

    let topo = RankTopology::resolve().map_err(TrainErr::from)?;
    let coordinator = topology::coordinator_addr().map_err(TrainErr::from)?;
    info!(rank = topo.rank(), num_ranks = topo.num_ranks(); "rank resolved");

    let labels = fs::read(&cfg.labels)?;
    let engine = RateEngine::new(&cfg.network, cfg.seed.unwrap_or(0));

    let channel = Collective::bootstrap(topo.rank(), topo.num_ranks(), coordinator)
        .await
        .map_err(TrainErr::from)?;

    let mut driver = TrainingLoop::new(cfg, topo, engine, channel, labels)?;
    let summary = driver.run().await?;

    let metrics = driver.metrics();
    info!(
        rank = topo.rank(),
        epochs = summary.epochs_run,
        trials = metrics.trials;
        "run complete: {}/{} correct in the final batch (sim {:?}, reduce {:?})",
        summary.last_correct,
        summary.last_trials,
        metrics.sim_time,
        metrics.reduce_time
    );

    Ok(())
}
