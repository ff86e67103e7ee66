use std::fs::File;
use std::io::BufReader;
use std::time::Instant;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use skewcache::attack::{AttackReport, PrimeProbeEngine};
use skewcache::cache::{CacheStore, CacheTrait};
use skewcache::config::{CacheConfig, LayeredConfig};
use skewcache::experiments::{
    eviction_distance, prime_and_prune_once, DistanceSummary, PrimePruneSummary,
};
use skewcache::io::get_reader;
use skewcache::simulator::{TraceResult, TraceSimulator};
use skewcache::{random_address, SimRng};

#[derive(Parser, Debug)]
#[command(
    about = String::from("Storage and replacement simulator for randomized skewed caches and TLBs")
)]
struct Args {
    config: String,

    /// Seed for every random choice made during the run
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Log level, RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print the time taken
    #[arg(short, long)]
    performance: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Builds generalized eviction sets with prime, prune and probe
    Attack {
        #[arg(long)]
        set_size: usize,
        #[arg(long, default_value_t = 100)]
        rounds: usize,
        /// Unrelated accesses made before each victim access
        #[arg(long, default_value_t = 0)]
        noise: usize,
    },
    /// Counts random accesses until a target is evicted
    Evict {
        #[arg(long, default_value_t = 1000)]
        samples: usize,
        #[arg(long, default_value_t = 1_000_000)]
        max_inserts: u64,
    },
    /// Primes and prunes once, then checks whether the target would evict an attacker address
    Prune {
        #[arg(long)]
        set_size: usize,
        #[arg(long, default_value_t = 1000)]
        samples: usize,
    },
    /// Replays a trace of hexadecimal addresses
    Trace { trace: String },
}

#[derive(Serialize)]
struct Named<T: Serialize> {
    name: String,
    #[serde(flatten)]
    result: T,
}

fn init_logging(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("Invalid log level {level}: {e}"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
    Ok(())
}

fn build_cache(config: &CacheConfig, rng: &mut SimRng) -> Result<CacheStore, String> {
    let policy_rng = SimRng::seed_from_u64(random_address(rng));
    CacheStore::from_config(config, policy_rng)
        .map_err(|e| format!("Couldn't build cache {}: {e}", config.name))
}

fn run_attack(
    config: &CacheConfig,
    rng: &mut SimRng,
    set_size: usize,
    rounds: usize,
    noise: usize,
) -> Result<AttackReport, String> {
    let cache = build_cache(config, rng)?;
    let target = random_address(rng);
    let engine_rng = SimRng::seed_from_u64(random_address(rng));
    let mut engine = PrimeProbeEngine::new(cache, engine_rng).with_noise(noise);
    Ok(engine.run(target, set_size, rounds))
}

fn run_evict(
    config: &CacheConfig,
    rng: &mut SimRng,
    samples: usize,
    max_inserts: u64,
) -> Result<DistanceSummary, String> {
    let mut cache = build_cache(config, rng)?;
    let distances: Vec<Option<u64>> = (0..samples)
        .map(|_| {
            let target = random_address(rng);
            eviction_distance(&mut cache, rng, target, max_inserts)
        })
        .collect();
    Ok(DistanceSummary::from_samples(&distances))
}

fn run_prune(
    config: &CacheConfig,
    rng: &mut SimRng,
    set_size: usize,
    samples: usize,
) -> Result<PrimePruneSummary, String> {
    let mut cache = build_cache(config, rng)?;
    let mut summary = PrimePruneSummary::new(set_size);
    for _ in 0..samples {
        let target = random_address(rng);
        summary.record(&prime_and_prune_once(&mut cache, rng, target, set_size));
    }
    Ok(summary)
}

fn run_trace(config: &CacheConfig, rng: &mut SimRng, trace: &str) -> Result<TraceResult, String> {
    let cache = build_cache(config, rng)?;
    let trace_file = File::open(trace)
        .map_err(|e| format!("Couldn't open the trace file at path {trace}: {e}"))?;
    let reader = get_reader(trace_file).map_err(|e| e.to_string())?;
    let mut simulator = TraceSimulator::new(&config.name, cache);
    let result = simulator.simulate(reader).map_err(|e| e.to_string())?.clone();
    info!(
        resident = simulator.cache().resident_count(),
        seconds = simulator.get_execution_time().as_secs_f64(),
        "Trace replayed"
    );
    Ok(result)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Couldn't serialise the output {e}"))?;
    println!("{output}");
    Ok(())
}

fn main() -> Result<(), String> {
    let start = Instant::now();
    let args = Args::parse();
    init_logging(&args.log_level)?;
    let config_file = File::open(&args.config)
        .map_err(|e| format!("Couldn't open the config file at path {}: {e}", args.config))?;
    let config: LayeredConfig = serde_json::from_reader(BufReader::new(config_file))
        .map_err(|e| format!("Couldn't parse the config file: {e}"))?;
    let mut rng = SimRng::seed_from_u64(args.seed);

    match &args.command {
        Command::Attack { set_size, rounds, noise } => {
            let results = config.caches
                .iter()
                .map(|c| {
                    run_attack(c, &mut rng, *set_size, *rounds, *noise)
                        .map(|result| Named { name: c.name.clone(), result })
                })
                .collect::<Result<Vec<_>, String>>()?;
            print_json(&results)?;
        }
        Command::Evict { samples, max_inserts } => {
            let results = config.caches
                .iter()
                .map(|c| {
                    run_evict(c, &mut rng, *samples, *max_inserts)
                        .map(|result| Named { name: c.name.clone(), result })
                })
                .collect::<Result<Vec<_>, String>>()?;
            print_json(&results)?;
        }
        Command::Prune { set_size, samples } => {
            let results = config.caches
                .iter()
                .map(|c| {
                    run_prune(c, &mut rng, *set_size, *samples)
                        .map(|result| Named { name: c.name.clone(), result })
                })
                .collect::<Result<Vec<_>, String>>()?;
            print_json(&results)?;
        }
        Command::Trace { trace } => {
            let results = config.caches
                .iter()
                .map(|c| run_trace(c, &mut rng, trace))
                .collect::<Result<Vec<_>, String>>()?;
            print_json(&results)?;
        }
    }

    if args.performance {
        let total_time = Instant::now() - start;
        println!(
            "Total execution time (includes configuration and output): {}s",
            total_time.as_nanos() as f64 / 1e9
        );
    }
    Ok(())
}
