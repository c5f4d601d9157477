//! Election simulator
//!
//! Runs a fleet of peers against the in-process coordination backend and
//! kills the leader's session once per round.

use clap::{Parser, Subcommand};
use minielect::client::MemoryCoordinator;
use minielect::common::{parse_duration, CallPolicy, Config};
use minielect::election::{ElectionListener, ElectionPeer, MembershipNode, RankResolver, Role};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minielect-sim")]
#[command(about = "Leader election simulator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a fleet and fail the leader once per round
    Simulate {
        /// Number of peers
        #[arg(long, default_value = "3")]
        peers: usize,

        /// Leader failures to inject
        #[arg(long, default_value = "3")]
        rounds: usize,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session timeout override (e.g. 7s, 500ms)
        #[arg(long)]
        session_timeout: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Logs role changes for one peer
struct LoggingListener {
    peer_id: String,
}

impl ElectionListener for LoggingListener {
    fn on_become_leader(&self) {
        tracing::info!("[{}] became leader", self.peer_id);
    }

    fn on_become_follower(&self, predecessor: &MembershipNode) {
        tracing::info!("[{}] following {}", self.peer_id, predecessor);
    }

    fn on_unresolved(&self) {
        tracing::info!("[{}] role unresolved", self.peer_id);
    }

    fn on_error(&self, error: &minielect::Error) {
        tracing::error!("[{}] election error: {}", self.peer_id, error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            peers,
            rounds,
            config,
            session_timeout,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(timeout) = session_timeout {
                config.coordination.session_timeout_ms =
                    u64::try_from(parse_duration(&timeout)?.as_millis())?;
            }
            init_tracing(&config.log_level);
            tokio::select! {
                result = simulate(config, peers, rounds) => result?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, abandoning the simulation");
                }
            }
        }
        Commands::Config { config } => {
            let config = Config::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn simulate(config: Config, peers: usize, rounds: usize) -> anyhow::Result<()> {
    if peers == 0 {
        anyhow::bail!("at least one peer is required");
    }

    let service = MemoryCoordinator::with_session_timeout(config.coordination.session_timeout());
    service.ensure_path(&config.election.root).await?;

    let mut fleet = Vec::with_capacity(peers);
    for i in 0..peers {
        let mut peer_config = config.clone();
        peer_config.peer_id = format!("peer-{}", i + 1);
        let (client, notifications) = service.connect().await;
        let listener = Arc::new(LoggingListener {
            peer_id: peer_config.peer_id.clone(),
        });
        let peer = ElectionPeer::spawn(&peer_config, Arc::new(client), notifications, listener).await?;
        fleet.push(peer);
    }

    let (observer, _) = service.connect().await;
    let resolver = RankResolver::new(
        Arc::new(observer),
        &config.election.node_prefix,
        CallPolicy::from_config(&config.election),
    );
    let deadline = config.coordination.session_timeout() * 2;

    let mut leader = wait_for_leader(&fleet, None, deadline).await?;
    report(&resolver, &config.election.root, 0).await?;

    for round in 1..=rounds {
        let status = fleet[leader].status();
        tracing::info!(
            "Round {}: expiring session {} of the leader",
            round,
            status.session
        );
        service.expire_session(status.session).await;

        leader = wait_for_leader(&fleet, status.node.as_ref(), deadline).await?;
        report(&resolver, &config.election.root, round).await?;
    }

    for peer in &fleet {
        peer.close().await?;
    }
    println!("Simulation finished: {} peers, {} failovers", peers, rounds);
    Ok(())
}

/// Index of the single peer leading from a node other than `previous`
async fn wait_for_leader(
    fleet: &[ElectionPeer],
    previous: Option<&MembershipNode>,
    deadline: Duration,
) -> anyhow::Result<usize> {
    let started = tokio::time::Instant::now();
    loop {
        let leaders: Vec<usize> = fleet
            .iter()
            .enumerate()
            .filter(|(_, peer)| {
                let status = peer.status();
                status.role == Role::Leader && status.node.as_ref() != previous
            })
            .map(|(i, _)| i)
            .collect();

        match leaders.as_slice() {
            [one] => return Ok(*one),
            [] => {}
            many => anyhow::bail!("{} peers claim leadership at once", many.len()),
        }
        if started.elapsed() > deadline {
            anyhow::bail!("no leader elected within {:?}", deadline);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn report(resolver: &RankResolver, root: &str, round: usize) -> anyhow::Result<()> {
    match resolver.leader(root).await? {
        Some((node, info)) => println!(
            "round {}: leader {} at {} (registered {})",
            round,
            info.peer_id,
            node.path,
            info.registered_at.to_rfc3339()
        ),
        None => println!("round {}: no leader", round),
    }
    Ok(())
}
