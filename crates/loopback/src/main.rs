mod config;
mod driver;

use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::Parser;

use config::LoopbackConfig;
use driver::Loopback;

#[derive(Parser)]
#[command(name = "tether-loopback")]
#[command(about = "Runs simulated players against an in-process server")]
struct Args {
    #[arg(short, long, help = "TOML file holding a loopback config")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(long)]
    clients: Option<usize>,

    #[arg(long)]
    matches: Option<usize>,

    #[arg(short, long, help = "Run length in seconds")]
    duration: Option<f64>,

    #[arg(long, help = "Mean one-way client delay in seconds")]
    delay: Option<f64>,

    #[arg(long, help = "Client delay variance in seconds")]
    jitter: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, help = "Pace ticks against the wall clock")]
    realtime: bool,
}

impl Args {
    fn apply(&self, config: &mut LoopbackConfig) {
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(matches) = self.matches {
            config.matches = matches;
        }
        if let Some(duration) = self.duration {
            config.duration_secs = duration;
        }
        let simulation = &mut config.client_simulation;
        if let Some(delay) = self.delay {
            simulation.emission_delay_mean = delay;
            simulation.reception_delay_mean = delay;
        }
        if let Some(jitter) = self.jitter {
            simulation.emission_delay_variance = jitter;
            simulation.reception_delay_variance = jitter;
        }
        if self.seed.is_some() {
            simulation.seed = self.seed;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LoopbackConfig::load(path)?,
        None => LoopbackConfig::default(),
    };
    args.apply(&mut config);
    ensure!(config.tick_rate > 0, "tick rate must be positive");
    ensure!(config.duration_secs >= 0.0, "duration must not be negative");

    let mut loopback = Loopback::new(config)?;
    loopback.run(args.realtime);
    log::info!(
        "loopback finished after {} ticks, {} state updates delivered",
        loopback.tick(),
        loopback.states_received().iter().sum::<u64>()
    );

    Ok(())
}
