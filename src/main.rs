use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tschctl::config::FrameRole;
use tschctl::node::NodeId;
use tschctl::sim::{DeterministicRng, NetworkConfig};
use tschctl::{ConfigLoader, GreedyPolicy, MeshSimulation, Outbox, Reflector, SimulationConfig};

/// Run the schedule controller against a simulated mesh.
#[derive(Debug, Parser)]
#[command(name = "tschctl", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Border router address or interface id.
    #[arg(long)]
    border_router: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Network prefix, hex (e.g. `aaaa`).
    #[arg(long)]
    prefix: Option<String>,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Motes joining besides the border router.
    #[arg(long, default_value_t = 12)]
    motes: u64,

    /// Simulated run length in virtual milliseconds. The controller ticks
    /// every `churn.tick_millis` of them.
    #[arg(long, value_name = "MILLIS", default_value_t = 600_000)]
    horizon: u64,

    /// Message loss probability.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Make one mote leave halfway through.
    #[arg(long)]
    churn: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("loading configuration")?;
    if let Some(br) = args.border_router {
        config.network.border_router = br;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(prefix) = args.prefix {
        config.network.prefix = prefix;
    }
    config.validate().context("validating configuration")?;
    if !(0.0..=1.0).contains(&args.loss) {
        anyhow::bail!("--loss must be within [0, 1], got {}", args.loss);
    }

    let broadcast = config.frame(FrameRole::Broadcast)?.name.clone();
    let unicast = config.frame(FrameRole::Unicast)?.name.clone();
    let root = config.border_router()?;
    let prefix = config.prefix()?;

    let policy = GreedyPolicy::new(broadcast.clone(), unicast.clone(), config.policy.clone());
    let reflector = Reflector::new(config.mesh()?, Outbox::new(), policy).with_churn(config.churn_settings());
    let tick = config.churn.tick_millis;
    let mut sim = MeshSimulation::new(
        reflector,
        SimulationConfig {
            seed: args.seed,
            network: NetworkConfig::lossy(5, 10, args.loss),
            tick_interval: tick,
            report_interval: tick * 10,
        },
    );
    sim.start(config.slotframes(), &broadcast, &config.policy.metrics)?;

    println!("═══════════════════════════════════════════════════════");
    println!("  tschctl: network '{}', border router {}", config.network.name, root);
    println!("  {} motes, seed {}, loss {:.2}", args.motes, args.seed, args.loss);
    println!("═══════════════════════════════════════════════════════");

    // Random tree: each mote picks an earlier one as its parent.
    let mut rng = DeterministicRng::new(args.seed ^ 0x5eed);
    let mut joined = vec![root];
    for i in 0..args.motes {
        let node = NodeId::from_interface_id(prefix, root.interface_id() + i + 1, config.network.port);
        let parent = joined[rng.next_range(0, joined.len() as u64) as usize];
        sim.join((i + 1) * 2 * tick, node, parent);
        joined.push(node);
    }
    if args.churn && joined.len() > 1 {
        let leaver = joined[joined.len() - 1];
        sim.leave(args.horizon / 2, leaver);
        info!(node = %leaver, "scheduled departure");
    }

    let processed = sim.run_until(args.horizon);

    let reflector = sim.reflector();
    let mesh = reflector.mesh();
    let stats = sim.stats();
    let net = sim.network().counters();
    println!();
    println!("  {} events in {} virtual ms", processed, sim.now().ticks());
    println!("  topology: {} nodes", mesh.topology().len());
    for frame in mesh.frames() {
        println!(
            "    {:<16} {:>3} slots  {:>4} cells  {:>3} blacklisted",
            frame.name(),
            frame.size(),
            frame.cells().len(),
            frame.blacklisted().count()
        );
    }
    println!(
        "  requests {}  replies {}  notifications {}  failures {}  unanswered {}",
        stats.requests, stats.replies, stats.notifications, stats.failures, stats.unanswered
    );
    println!(
        "  network: delivered {}  dropped {}",
        net.delivered,
        net.dropped()
    );
    println!(
        "  in flight {}  sessions {}  disconnects {}  blacklisted links {}",
        reflector.in_flight(),
        reflector.active_sessions(),
        stats.disconnects,
        reflector.hooks().blacklisted_links()
    );
    Ok(())
}
