//! Hedge Keeper - cross-chain hedge rebalancing keeper.
//!
//! Main entry point for the keeper loop and owner/admin commands.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use hedge_keeper::automation::{AutomationEngine, RebalanceExecutor, TransferStatus};
use hedge_keeper::chain::{ChainConfig, ChainId, ChainRegistry, PaperBridge, PaperPriceFeed, PriceFeed};
use hedge_keeper::config::Config;
use hedge_keeper::events::EventBus;
use hedge_keeper::ledger::HedgeLedger;
use hedge_keeper::persistence::PersistenceManager;
use hedge_keeper::policy::{AutomationPolicy, PolicyStore};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Hedge Keeper CLI
#[derive(Parser)]
#[command(name = "hedge-keeper")]
#[command(version, about = "Cross-chain hedge rebalancing keeper")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the paper keeper loop (default)
    Run,

    /// Run one read-only check and print the intents as JSON
    Check,

    /// Manage an owner's automation policy
    Policy {
        #[command(subcommand)]
        action: PolicyCommand,
    },

    /// Show persisted positions, policies and transfers
    Status {
        /// Show transfer history and recent domain events
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Validate and store a policy, replacing any previous one
    Set {
        #[arg(short, long)]
        owner: String,

        /// Open a hedge below this price
        #[arg(long)]
        min_price: Decimal,

        /// Close the hedge above this price
        #[arg(long)]
        max_price: Decimal,

        /// Cross-chain divergence (bps) that triggers a rebalance
        #[arg(long, default_value = "500")]
        threshold_bps: u32,

        /// Comma-separated chain ids to monitor
        #[arg(long, value_delimiter = ',', required = true)]
        chains: Vec<u64>,

        /// Quantity opened per hedge
        #[arg(long, default_value = "1")]
        amount: Decimal,
    },

    /// Print an owner's policy
    Show {
        #[arg(short, long)]
        owner: String,
    },

    /// Stop automation for an owner
    Clear {
        #[arg(short, long)]
        owner: String,
    },
}

/// Wired components of a paper keeper.
struct App {
    config: Config,
    engine: AutomationEngine,
    feed: Arc<PaperPriceFeed>,
    persistence: Arc<PersistenceManager>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Check) => run_check(config).await,
        Some(Commands::Policy { action }) => run_policy(config, action).await,
        Some(Commands::Status { verbose }) => show_status(&config.persistence.db_path, verbose),
        Some(Commands::Run) | None => run_keeper(config).await,
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "hedge-keeper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hedge_keeper=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Asset: {}", config.engine.asset);
    info!("   Staleness Bound: {}s", config.engine.staleness_bound_secs);
    info!("   Bridge Timeout: {}s", config.engine.bridge_timeout_secs);
    info!("   Check Interval: {}s", config.engine.check_interval_secs);
    info!("   Database: {}", config.persistence.db_path);
    for chain in &config.chains {
        info!(
            "   Chain {} ({}): paper price {}, bridge fee {}, active {}",
            chain.chain_id, chain.name, chain.paper_price, chain.paper_bridge_fee, chain.is_active
        );
    }
}

/// Build the registry, ledger and engine over paper capabilities and
/// restore persisted state.
async fn build_app(config: Config) -> Result<App> {
    if let Some(parent) = Path::new(&config.persistence.db_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let persistence = Arc::new(PersistenceManager::new(&config.persistence.db_path)?);
    let events = EventBus::new(config.engine.event_buffer).with_journal(persistence.clone());

    let registry = Arc::new(ChainRegistry::new());
    let feed = Arc::new(PaperPriceFeed::new());
    for chain in &config.chains {
        let chain_id = ChainId(chain.chain_id);
        let bridge = PaperBridge::new(chain.paper_bridge_fee).with_confirm_after(
            chrono::Duration::seconds(chain.paper_confirm_after_secs as i64),
        );

        registry
            .register(
                ChainConfig {
                    chain_id,
                    name: chain.name.clone(),
                    price_feed_ref: chain.price_feed_ref.clone(),
                    bridge_adapter_ref: chain.bridge_adapter_ref.clone(),
                    is_active: chain.is_active,
                },
                feed.clone(),
                Arc::new(bridge),
            )
            .await?;
        feed.set_price(chain_id, chain.paper_price).await;
    }

    let ledger = Arc::new(
        HedgeLedger::new(registry.clone(), events.clone(), config.engine.amount_decimals)
            .with_journal(persistence.clone()),
    );
    ledger.restore(persistence.load_positions()?).await;

    let executor = Arc::new(RebalanceExecutor::new(
        registry.clone(),
        ledger.clone(),
        events,
        persistence.clone(),
        config.engine.asset.clone(),
        config.engine.bridge_timeout(),
    ));

    let policies = Arc::new(PolicyStore::new(registry.clone()));
    for (owner, policy) in persistence.load_policies()? {
        if let Err(e) = policies.set(&owner, policy).await {
            warn!(%owner, error = %e, "Stored policy no longer valid, not loaded");
        }
    }

    let engine = AutomationEngine::new(
        config.engine.clone(),
        registry,
        policies,
        ledger,
        executor,
    );

    Ok(App {
        config,
        engine,
        feed,
        persistence,
    })
}

/// Keep paper readings fresh so the staleness bound does not exclude them.
async fn refresh_paper_prices(feed: &PaperPriceFeed, config: &Config, asset: &str) {
    for chain in &config.chains {
        let chain_id = ChainId(chain.chain_id);
        if let Ok(reading) = feed.latest_price(chain_id, asset).await {
            feed.set_price(chain_id, reading.price).await;
        }
    }
}

async fn run_keeper(config: Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Hedge Keeper v{} - Paper Mode                  ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    log_config(&config);
    let app = build_app(config).await?;
    let interval = Duration::from_secs(app.config.engine.check_interval_secs.max(1));

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!("🚀 Starting keeper loop...");
    let mut cycle: u64 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        cycle += 1;
        let loop_start = Utc::now();

        refresh_paper_prices(&app.feed, &app.config, &app.config.engine.asset).await;

        // Resolve deliveries before deciding, so moved exposure is visible
        match app.engine.executor().poll_deliveries().await {
            Ok(resolved) if !resolved.is_empty() => {
                info!("🌉 [BRIDGE] {} transfer(s) resolved", resolved.len());
            }
            Ok(_) => {}
            Err(e) => error!("❌ [BRIDGE] Delivery poll failed: {}", e),
        }
        match app.engine.executor().sweep_timed_out(Utc::now()).await {
            Ok(expired) if !expired.is_empty() => {
                warn!("⏰ [BRIDGE] {} transfer(s) timed out", expired.len());
            }
            Ok(_) => {}
            Err(e) => error!("❌ [BRIDGE] Timeout sweep failed: {}", e),
        }

        let check = app.engine.check_upkeep().await;
        if check.needs_action {
            info!("🔎 [CHECK #{}] {} intent(s)", cycle, check.intents.len());
            for intent in &check.intents {
                info!("   {}", intent);
            }
            let report = app.engine.perform_upkeep(&check.intents).await;
            info!(
                "⚙️  [PERFORM] acted {}, skipped {}, failed {}",
                report.acted(),
                report.skipped(),
                report.failed()
            );
        } else {
            debug!("🔎 [CHECK #{}] nothing to do", cycle);
        }

        let loop_duration = (Utc::now() - loop_start).num_milliseconds();
        debug!("⏱️  Cycle completed in {}ms", loop_duration);

        tokio::time::sleep(interval).await;
    }

    info!("👋 Hedge Keeper shutdown complete after {} cycle(s)", cycle);
    Ok(())
}

async fn run_check(config: Config) -> Result<()> {
    let app = build_app(config).await?;
    let check = app.engine.check_upkeep().await;
    println!("{}", serde_json::to_string_pretty(&check)?);
    Ok(())
}

async fn run_policy(config: Config, action: PolicyCommand) -> Result<()> {
    let app = build_app(config).await?;

    match action {
        PolicyCommand::Set {
            owner,
            min_price,
            max_price,
            threshold_bps,
            chains,
            amount,
        } => {
            let policy = AutomationPolicy {
                min_price,
                max_price,
                rebalance_threshold_bps: threshold_bps,
                monitored_chain_ids: chains.into_iter().map(ChainId).collect::<BTreeSet<_>>(),
                hedge_amount: amount,
            };
            app.engine
                .set_policy(&owner, policy.clone())
                .await
                .with_context(|| format!("Policy for {owner} rejected"))?;
            app.persistence.save_policy(&owner, &policy)?;
            println!("✅ Policy stored for {owner}");
        }
        PolicyCommand::Show { owner } => {
            let policy = app.engine.get_policy(&owner).await?;
            println!("{}", serde_json::to_string_pretty(&*policy)?);
        }
        PolicyCommand::Clear { owner } => {
            let cleared = app.engine.clear_policy(&owner).await;
            app.persistence.delete_policy(&owner)?;
            if cleared {
                println!("✅ Policy cleared for {owner}; positions left as they are");
            } else {
                println!("No policy configured for {owner}");
            }
        }
    }

    Ok(())
}

/// Show keeper state from the database without starting the engine.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              HEDGE KEEPER STATUS                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The keeper has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let policies = persistence.load_policies()?;
    println!("\n📜 Policies ({})", policies.len());
    for (owner, policy) in &policies {
        let chains: Vec<String> = policy
            .monitored_chain_ids
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "   ├─ {}: [{} .. {}] threshold {} bps, amount {}, chains {}",
            owner,
            policy.min_price,
            policy.max_price,
            policy.rebalance_threshold_bps,
            policy.hedge_amount,
            chains.join(",")
        );
    }

    let positions = persistence.load_positions()?;
    let active: Vec<_> = positions.iter().filter(|p| p.is_active).collect();
    println!("\n🔓 Active Positions ({} of {})", active.len(), positions.len());
    for pos in &active {
        println!(
            "   ├─ {} on chain {} #{}: {} @ {} = {} (open {}h)",
            pos.owner,
            pos.chain_id,
            pos.position_id,
            pos.amount,
            pos.target_price,
            pos.notional().round_dp(2),
            pos.age(Utc::now()).num_hours()
        );
    }

    let pending = persistence.list_transfers(Some(TransferStatus::Pending))?;
    println!("\n🌉 Pending Transfers ({})", pending.len());
    for transfer in &pending {
        let age = Utc::now() - transfer.initiated_at;
        println!(
            "   ├─ {} {}: chain {} -> {} amount {} fee {} ({}m in flight)",
            transfer.transfer_id,
            transfer.owner,
            transfer.source_chain_id,
            transfer.target_chain_id,
            transfer.amount,
            transfer.fee,
            age.num_minutes()
        );
    }

    if verbose {
        let resolved: Vec<_> = persistence
            .list_transfers(None)?
            .into_iter()
            .filter(|t| !t.is_pending())
            .collect();
        if !resolved.is_empty() {
            println!("\n📦 Resolved Transfers");
            for transfer in &resolved {
                println!(
                    "   ├─ {} {}: {} {}",
                    transfer.transfer_id,
                    transfer.owner,
                    transfer.status.as_str(),
                    transfer.failure_reason.as_deref().unwrap_or("")
                );
            }
        }

        if let Ok(events) = persistence.recent_events(10) {
            if !events.is_empty() {
                println!("\n🗒️  Recent Events");
                for event in &events {
                    println!(
                        "   ├─ {} {} {}",
                        event.timestamp().format("%Y-%m-%d %H:%M:%S"),
                        event.kind(),
                        event.owner()
                    );
                }
            }
        }
    }

    println!();
    Ok(())
}
