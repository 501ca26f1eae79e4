// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use pantry_monitor::{
    db, scanner, AnthropicClient, CommandImageSource, Config, FileImageSource, ImageSource,
    ImageStore, InventoryReconciler, ScanOutcome, Scanner,
};

#[derive(Parser)]
#[command(name = "pantry-monitor", version, about = "Daily pantry inventory from webcam snapshots")]
struct Cli {
    /// JSON config file (defaults to ./pantry.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and indexes (safe to re-run)
    Setup,
    /// Drop and recreate all tables
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Capture, compare with the previous image, record changes (default)
    Scan {
        /// Use an existing JPEG instead of the capture command
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Capture one frame to the test image to check the camera angle
    TestCamera,
    /// Print inventory, recent scans and statistics
    Inventory,
    /// Browse inventory in the terminal UI
    View,
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Scan { image: None }) {
        Commands::Setup => run_setup(&config),
        Commands::Reset { yes } => run_reset(&config, yes),
        Commands::Scan { image } => run_scan(&config, image),
        Commands::TestCamera => run_test_camera(&config),
        Commands::Inventory => run_inventory(&config),
        Commands::View => run_ui_mode(&config),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_database(config: &Config) -> Result<Connection> {
    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("failed to open database: {}", config.database_path.display()))?;
    db::setup_database(&conn)?;
    Ok(conn)
}

/// Read-only commands refuse to create an empty database
fn open_existing_database(config: &Config) -> Result<Connection> {
    if !config.database_path.exists() {
        bail!(
            "database not found at {} (run `pantry-monitor setup` first)",
            config.database_path.display()
        );
    }
    open_database(config)
}

fn run_setup(config: &Config) -> Result<()> {
    println!("🔧 Setting up pantry database...");
    open_database(config)?;
    ImageStore::from_config(config).ensure_dir()?;
    println!("✓ Database ready: {}", config.database_path.display());
    println!("✓ Image directory: {}", config.image_directory.display());
    Ok(())
}

fn run_reset(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        println!("⚠️  This deletes ALL scans, items and change history.");
        print!("Type YES to continue: ");
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if answer.trim() != "YES" {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    let conn = open_database(config)?;
    db::reset_database(&conn)?;
    println!("✓ Database reset");
    Ok(())
}

fn run_scan(config: &Config, image: Option<PathBuf>) -> Result<()> {
    match image {
        Some(path) => scan_with(config, FileImageSource::new(path)),
        None => scan_with(config, CommandImageSource::new(&config.capture_command)?),
    }
}

fn scan_with<S: ImageSource>(config: &Config, source: S) -> Result<()> {
    let mut conn = open_database(config)?;
    let scanner = Scanner::new(
        AnthropicClient::from_config(config)?,
        source,
        ImageStore::from_config(config),
        InventoryReconciler::with_policy(config.fuzzy_match_policy),
    );

    println!("{}", "=".repeat(60));
    println!("PANTRY SCANNER - Daily Comparison");
    println!("Time: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("{}\n", "=".repeat(60));

    match scanner.run(&mut conn, Utc::now())? {
        ScanOutcome::Baseline { initial } => {
            if let Some(report) = initial {
                println!("✓ Found {} initial items", report.added.len());
                for applied in &report.added {
                    println!("  + {}", applied.name);
                }
            }
            println!("\n✓ Baseline image saved!");
            println!("💡 Run the scan again to detect changes.");
        }
        ScanOutcome::Compared {
            report,
            analysis,
            api_cost,
        } => {
            println!("CHANGES DETECTED:");
            println!("{}", "=".repeat(60));
            println!("{}", analysis);
            println!("{}\n", "=".repeat(60));
            println!("💾 {}", report.summary());
            println!("💰 Estimated cost: ${:.6}", api_cost);
            println!("\n✅ Scan complete!");
        }
    }

    Ok(())
}

fn run_test_camera(config: &Config) -> Result<()> {
    println!("🔍 CAMERA TEST MODE");
    let source = CommandImageSource::new(&config.capture_command)?;
    let path = scanner::test_camera(&source, &ImageStore::from_config(config))?;

    println!("\n✅ Camera test successful!");
    println!("📁 Test image saved to: {}", path.display());
    println!("👁️  Open this file to verify your camera angle is correct");
    Ok(())
}

fn run_inventory(config: &Config) -> Result<()> {
    let conn = open_existing_database(config)?;
    let rule = "=".repeat(60);

    println!("\n{}\nCURRENT PANTRY INVENTORY\n{}\n", rule, rule);
    let items = db::get_current_inventory(&conn)?;
    if items.is_empty() {
        println!("📦 No items in inventory yet.");
    } else {
        println!("📦 {} Active Items:\n", items.len());
        for item in &items {
            println!("  • {}", item.name);
            println!("    Quantity: {}", item.quantity);
            println!("    First seen: {}", item.first_seen.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
            println!("    Last seen: {}", item.last_seen.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
            println!();
        }
    }

    println!("\n{}\nRECENT SCANS\n{}\n", rule, rule);
    let scans = db::get_recent_scans(&conn, 5)?;
    if scans.is_empty() {
        println!("📸 No scans yet.");
    } else {
        for scan in &scans {
            println!(
                "Scan #{} - {}",
                scan.id,
                scan.scanned_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            );
            println!(
                "  Cost: ${:.6} | Tokens: {} in, {} out",
                scan.api_cost, scan.input_tokens, scan.output_tokens
            );
            println!();
        }
    }

    println!("\n{}\nSTATISTICS\n{}\n", rule, rule);
    let stats = db::get_statistics(&conn, Utc::now())?;
    println!("Total scans: {}", stats.total_scans);
    println!("Active items: {}", stats.active_items);
    println!("Total API cost: ${:.6}", stats.total_api_cost);
    println!("Changes this week: {}", stats.changes_last_week);
    println!();

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    let conn = open_existing_database(config)?;
    let mut app = ui::App::load(&conn, Utc::now())?;

    ui::run_ui(&mut app)?;
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    bail!("TUI not available: rebuild with `--features tui`, or run the dashboard with `cargo run --bin pantry-server --features server`")
}
