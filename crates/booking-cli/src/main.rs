// ============================================================================
// tutor-chain - command-line host for the tutoring booking core
// ============================================================================
// Usage:
//   tutor-chain networks                          List supported networks
//   tutor-chain status                            Show wallet connection
//   tutor-chain connect [--network localhost]     Connect the wallet
//   tutor-chain book --tutor "Ada" --duration "1h 30m" --price 50.75
//   tutor-chain sessions [--past]                 List your sessions
//   tutor-chain intent course 7 59.99             Start a checkout
//   tutor-chain pay [--simulate]                  Pay for the pending checkout
//   tutor-chain watch                             Follow wallet changes
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use booking_core::units::{format_address, format_time, price_to_hundredths, time_to_hundredths};
use booking_core::{
    redirect_for, BookingContext, ConfirmationConfig, ConnectionManager, ItemType, JsonRpcWallet,
    LocalStore, NetworkKey, NetworkRegistry, Notification, NotificationLevel, Notifier,
    PaymentMode, PaymentOrchestrator, PendingPaymentIntent, SessionRecord, UserRecord,
    WalletProvider,
};

/// Tutoring marketplace wallet and booking tool
#[derive(Parser)]
#[command(name = "tutor-chain", version, about = "Book and settle tutoring sessions on-chain")]
struct Cli {
    /// JSON-RPC endpoint of the wallet that signs transactions
    #[arg(long, global = true, env = "WALLET_RPC_URL", default_value = "http://127.0.0.1:1248")]
    wallet_url: String,

    /// Path to the local state file (default: ~/.tutor-chain/state.redb)
    #[arg(long, global = true, env = "TUTOR_CHAIN_DB_PATH")]
    db_path: Option<String>,

    /// Network to connect or pay on: sepolia, localhost
    #[arg(long, global = true)]
    network: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported networks and whether they are configured
    Networks,

    /// Show the wallet connection
    Status,

    /// Connect the wallet (prompts in the wallet)
    Connect,

    /// Forget the wallet connection locally
    Disconnect,

    /// Move the connection to another network
    Switch {
        /// Target network: sepolia, localhost
        network: String,
    },

    /// Book a tutoring session
    Book {
        /// Tutor name recorded on-chain
        #[arg(long)]
        tutor: String,

        /// Session length, e.g. "1h 30m" or "45m"
        #[arg(long, default_value = "1h")]
        duration: String,

        /// Price in dollars, e.g. 50.75
        #[arg(long)]
        price: f64,
    },

    /// Mark a session complete (only the booking student can)
    Complete {
        session_id: u64,
    },

    /// List your sessions
    Sessions {
        /// Show completed sessions instead of upcoming ones
        #[arg(long)]
        past: bool,
    },

    /// Start a checkout for a course or tutor
    Intent {
        /// course or tutor
        item_type: String,
        item_id: String,
        price: f64,
    },

    /// Pay for the pending checkout
    Pay {
        /// Run the simulated flow without a wallet
        #[arg(long)]
        simulate: bool,
    },

    /// Save a local profile used as your student identity
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove the local profile and everything bound to it
    Logout,

    /// List enrolled courses
    Courses,

    /// Estimate the fee for one booking
    Gas,

    /// Follow wallet account and chain changes until Ctrl-C
    Watch {
        /// Wallet poll interval in milliseconds
        #[arg(long, default_value = "2000")]
        interval_ms: u64,
    },
}

/// Prints notifications as they happen
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, n: Notification) {
        let marker = match n.level {
            NotificationLevel::Success => "[ok]",
            NotificationLevel::Info => "[info]",
            NotificationLevel::Warning => "[warn]",
            NotificationLevel::Error => "[error]",
        };
        println!("{} {} - {}", marker, n.title, n.description);
    }
}

fn parse_network(raw: Option<&str>) -> Result<Option<NetworkKey>> {
    raw.map(|s| s.parse::<NetworkKey>())
        .transpose()
        .context("Valid networks: sepolia, localhost")
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tutor_chain=info".parse()?)
                .add_directive("booking_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let network = parse_network(cli.network.as_deref())?;

    let store = Arc::new(LocalStore::open(cli.db_path.as_deref())?);
    let registry = Arc::new(NetworkRegistry::from_env());

    // Commands that never talk to a wallet
    match &cli.command {
        Commands::Networks => return cmd_networks(&registry),
        Commands::Login { email, name } => return cmd_login(&store, email, name.clone()),
        Commands::Logout => {
            store.clear_user()?;
            println!("Signed out.");
            return Ok(());
        }
        Commands::Courses => return cmd_courses(&store),
        Commands::Intent {
            item_type,
            item_id,
            price,
        } => return cmd_intent(&store, item_type, item_id, *price),
        _ => {}
    }

    let wallet = JsonRpcWallet::detect(cli.wallet_url.clone()).await.map(Arc::new);
    match &wallet {
        Some(w) => info!("Using wallet at {}", w.url()),
        None => info!("No wallet reachable at {}", cli.wallet_url),
    }

    let manager = Arc::new(ConnectionManager::new(
        wallet.clone().map(|w| w as Arc<dyn WalletProvider>),
        registry,
        store.clone(),
        Arc::new(ConsoleNotifier),
        ConfirmationConfig::default(),
    ));

    // A remembered address means the user has not disconnected
    if store.wallet_address()?.is_some() {
        manager.probe_existing_connection().await;
    }

    let context = BookingContext::new(manager);

    match cli.command {
        Commands::Status => cmd_status(&context),
        Commands::Connect => {
            context.connect(network).await?;
            cmd_status(&context)
        }
        Commands::Disconnect => {
            context.disconnect().await?;
            Ok(())
        }
        Commands::Switch { network } => {
            let key: NetworkKey = network.parse()?;
            if !context.switch_network(key).await {
                anyhow::bail!("Could not switch to {}", key);
            }
            cmd_status(&context)
        }
        Commands::Book {
            tutor,
            duration,
            price,
        } => {
            let time = time_to_hundredths(&duration);
            if time == 0 {
                anyhow::bail!("Unrecognized duration '{}'. Use e.g. \"1h 30m\"", duration);
            }
            if time == u64::MAX {
                anyhow::bail!("Duration '{}' is too long", duration);
            }
            let booked = context
                .book_session(&tutor, time, price_to_hundredths(price))
                .await?;
            println!("Session #{} booked", booked.session_id);
            println!("Transaction: {}", booked.receipt.tx_hash);
            if let Some(url) = booked.receipt.explorer_url {
                println!("Explorer:    {}", url);
            }
            Ok(())
        }
        Commands::Complete { session_id } => {
            let receipt = context.complete_session(session_id).await?;
            println!("Transaction: {}", receipt.tx_hash);
            Ok(())
        }
        Commands::Sessions { past } => {
            let sessions = if past {
                context.past_sessions().await?
            } else {
                context.upcoming_sessions().await?
            };
            print_sessions(&sessions, if past { "past" } else { "upcoming" });
            Ok(())
        }
        Commands::Pay { simulate } => {
            let mode = if simulate {
                PaymentMode::Simulated
            } else {
                PaymentMode::OnChain
            };
            if !simulate {
                println!("Estimated network fee: {}", context.gas_estimate().await);
            }
            let orchestrator = PaymentOrchestrator::new(context, mode);
            match orchestrator.execute_payment(network).await {
                Ok(receipt) => {
                    println!("Paid: {} {}", receipt.item_type, receipt.item_id);
                    println!("Transaction: {}", receipt.tx.tx_hash);
                    if let Some(url) = receipt.tx.explorer_url {
                        println!("Explorer:    {}", url);
                    }
                    if receipt.enrollment_pending {
                        println!("Warning: enrollment was not saved; run `courses` to check");
                    }
                    println!("Next: {:?}", receipt.destination);
                    Ok(())
                }
                Err(e) => {
                    if let Some(dest) = redirect_for(&e) {
                        println!("Next: {:?}", dest);
                    }
                    Err(e.into())
                }
            }
        }
        Commands::Gas => {
            println!("Estimated fee per booking: {}", context.gas_estimate().await);
            Ok(())
        }
        Commands::Watch { interval_ms } => {
            let wallet = wallet.context("No wallet reachable; nothing to watch")?;
            cmd_watch(&context, wallet, Duration::from_millis(interval_ms)).await
        }
        Commands::Networks
        | Commands::Login { .. }
        | Commands::Logout
        | Commands::Courses
        | Commands::Intent { .. } => Ok(()),
    }
}

async fn cmd_watch(
    context: &BookingContext,
    wallet: Arc<JsonRpcWallet>,
    interval: Duration,
) -> Result<()> {
    let poller = wallet.watch(interval);
    let events = context.manager().clone().spawn_event_loop();
    let mut changes = context.subscribe();

    cmd_status(context)?;
    println!("Watching wallet (Ctrl-C to stop)");

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = changes.borrow_and_update().clone();
                if !state.is_busy {
                    println!("---");
                    cmd_status(context)?;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.abort();
    if let Some(events) = events {
        events.abort();
    }
    Ok(())
}

fn cmd_networks(registry: &NetworkRegistry) -> Result<()> {
    println!(
        "{:<10}  {:<18}  {:<10}  {:<12}  {}",
        "KEY", "NAME", "CHAIN ID", "CONFIGURED", "CONTRACT"
    );
    println!("{}", "-".repeat(100));
    for n in registry.all() {
        println!(
            "{:<10}  {:<18}  {:<10}  {:<12}  {}",
            n.key,
            n.display_name,
            n.chain_id,
            registry.is_configured(n.key),
            n.contract_address
        );
    }
    println!("\nDefault: {}", registry.preferred_default());
    Ok(())
}

fn cmd_status(context: &BookingContext) -> Result<()> {
    let state = context.state();
    match state.address {
        Some(address) if state.is_connected => {
            println!("Wallet:  {}", format_address(&address.to_string()));
            println!("Balance: {}", state.balance_display);
            match state.active_network {
                Some(key) => println!("Network: {}", key),
                None => println!(
                    "Network: unsupported (chain {})",
                    state.chain_id.map(|c| c.to_string()).unwrap_or_else(|| "?".into())
                ),
            }
        }
        _ => println!("Wallet not connected."),
    }
    Ok(())
}

fn cmd_login(store: &LocalStore, email: &str, name: Option<String>) -> Result<()> {
    let mut user = UserRecord::new(email, name);
    if let Some(address) = store.wallet_address()? {
        user.wallet_address = Some(address);
    }
    store.save_user(&user)?;
    println!("Signed in as {}", user.email);
    Ok(())
}

fn cmd_courses(store: &LocalStore) -> Result<()> {
    let courses = store.enrolled_courses()?;
    if courses.is_empty() {
        println!("No enrolled courses.");
        return Ok(());
    }

    println!("{:<10}  {:<30}  {:<26}  {}", "ID", "TITLE", "ENROLLED", "PROGRESS");
    println!("{}", "-".repeat(80));
    for c in &courses {
        println!(
            "{:<10}  {:<30}  {:<26}  {}%",
            c.id, c.title, c.enrolled_date, c.progress
        );
    }
    println!("\nTotal: {} courses", courses.len());
    Ok(())
}

fn cmd_intent(store: &LocalStore, item_type: &str, item_id: &str, price: f64) -> Result<()> {
    let item_type: ItemType = item_type.parse().map_err(anyhow::Error::msg)?;
    if price <= 0.0 {
        anyhow::bail!("Price must be positive");
    }
    let intent = PendingPaymentIntent::new(item_type, item_id, price);
    store.set_pending_payment(&intent)?;
    println!(
        "Checkout ready: {} {} for ${:.2}. Run `tutor-chain pay` to complete it.",
        item_type, item_id, price
    );
    Ok(())
}

fn print_sessions(sessions: &[SessionRecord], label: &str) {
    if sessions.is_empty() {
        println!("No {} sessions.", label);
        return;
    }

    println!(
        "{:<6}  {:<30}  {:<10}  {:<10}  {}",
        "ID", "TUTOR", "DURATION", "PRICE", "STATUS"
    );
    println!("{}", "-".repeat(75));
    for s in sessions {
        println!(
            "{:<6}  {:<30}  {:<10}  ${:<9}  {}",
            s.session_id,
            s.tutor.chars().take(30).collect::<String>(),
            format_time(s.scheduled_time),
            s.price_display(),
            if s.completed { "completed" } else { "booked" }
        );
    }
    println!("\nTotal: {} {} sessions", sessions.len(), label);
}
