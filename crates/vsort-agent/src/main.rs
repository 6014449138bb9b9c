//! # vsort CLI
//!
//! Download-folder organizer with an encrypted vault.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use vsort_agent::archive::{vault_store, VaultArchiver};
use vsort_agent::{run_agent, Pipeline, SessionStats};
use vsort_config::logging::{init_logging, LogLevel};
use vsort_config::{log_cli_info, Config, ConfigOverrides, ConfigSources, RuleSpec};
use vsort_ledger::Ledger;
use vsort_vault::{parse_share_token, Vault};

/// vsort - keeps the downloads folder organized and backs up what matters
#[derive(Parser)]
#[command(name = "vsort")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./vsort.toml over ~/.vsort/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Folder to watch
    #[arg(long, global = true, value_name = "DIR")]
    watch: Option<PathBuf>,

    /// Root of the organized tree
    #[arg(long, global = true, value_name = "DIR")]
    organized: Option<PathBuf>,

    /// Keep blobs in the local store instead of the remote publisher
    #[arg(long, global = true)]
    offline: bool,

    /// error | warn | info | debug | trace
    #[arg(long, global = true, env = "VSORT_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the folder and organize files until Ctrl-C
    Run,

    /// Organize what is in the folder now, flush uploads, and exit
    Scan {
        /// Folder to scan (default: the watch folder)
        #[arg(value_name = "DIR")]
        directory: Option<PathBuf>,
    },

    /// Encrypted vault
    Vault {
        #[command(subcommand)]
        command: VaultCommands,
    },

    /// Ledger totals and per-category breakdown
    Stats,

    /// Workflow rules
    Rules {
        #[command(subcommand)]
        command: Option<RuleCommands>,
    },

    /// Build, upload and anchor the daily report
    Report {
        /// UTC date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print the default configuration
    Config,
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Encrypt and upload one file
    Store {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Encrypt and upload every file of a folder under one key
    StoreFolder {
        #[arg(value_name = "DIR")]
        directory: PathBuf,
    },

    /// Download and decrypt
    Retrieve {
        /// Share token (carries blob id, key and nonce)
        #[arg(long, conflicts_with_all = ["blob", "key", "nonce"])]
        token: Option<String>,

        #[arg(long, requires_all = ["key", "nonce"])]
        blob: Option<String>,

        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        nonce: Option<String>,

        /// Output file (default: the stored file name)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show what a share token grants
    Inspect {
        #[arg(value_name = "TOKEN")]
        token: String,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List rules (default)
    List,
    /// Add or replace a rule from its JSON form
    Add {
        #[arg(value_name = "JSON")]
        spec: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
    Remove {
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = config
        .logging
        .level
        .parse::<LogLevel>()
        .unwrap_or(LogLevel::Info);
    init_logging(level);

    match cli.command {
        Commands::Run => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let stats = rt.block_on(run_agent(config))?;
            print_session(&stats);
            Ok(())
        }
        Commands::Scan { directory } => cmd_scan(&config, directory),
        Commands::Vault { command } => cmd_vault(&config, command),
        Commands::Stats => cmd_stats(&config),
        Commands::Rules { command } => cmd_rules(&config, command.unwrap_or(RuleCommands::List)),
        Commands::Report { date } => cmd_report(&config, date),
        Commands::Config => {
            print!("{}", Config::default_toml()?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut sources = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            ConfigSources::with_project_file(path)
        }
        None => ConfigSources::standard(),
    };
    sources.overrides = ConfigOverrides {
        watch_folder: cli.watch.clone(),
        organized_folder: cli.organized.clone(),
        database_path: None,
        log_level: cli.log_level.clone(),
        offline: cli.offline,
    };
    Config::load_with(&sources).context("Failed to load configuration")
}

fn open_ledger(config: &Config) -> Result<Ledger> {
    Ledger::open(&config.database.path)
        .with_context(|| format!("Failed to open ledger at {}", config.database.path.display()))
}

fn print_session(stats: &SessionStats) {
    println!(
        "Session: {} moved, {} duplicates, {} errors, {} ignored",
        stats.moved, stats.duplicates, stats.errors, stats.ignored
    );
}

fn cmd_scan(config: &Config, directory: Option<PathBuf>) -> Result<()> {
    let dir = directory.unwrap_or_else(|| config.folders.watch_folder.clone());
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let mut pipeline = Pipeline::from_config(config, open_ledger(config)?)?;
    log_cli_info!("Scanning", dir = %dir.display());
    pipeline.scan_once(&dir);
    print_session(&pipeline.stats());
    Ok(())
}

fn cmd_vault(config: &Config, command: VaultCommands) -> Result<()> {
    match command {
        VaultCommands::Store { file } => {
            let archiver = VaultArchiver::from_config(config, open_ledger(config)?)?;
            let archived = archiver.archive(&file)?;
            println!("🔒 Stored {} ({} bytes)", archived.manifest.filename, archived.manifest.size);
            println!("   Blob:  {}", archived.manifest.blob_id);
            println!("   Token: {}", archived.token);
            println!("   Link:  {}", archived.link);
            Ok(())
        }
        VaultCommands::StoreFolder { directory } => {
            let archiver = VaultArchiver::from_config(config, open_ledger(config)?)?;
            let manifest = archiver.archive_folder(&directory)?;
            println!(
                "🔒 Stored {} files from {}",
                manifest.file_count, manifest.folder_name
            );
            println!("   Root hash: {}", manifest.root_hash);
            if let Some(id) = &manifest.manifest_blob_id {
                println!("   Audit manifest: {}", id);
            }
            for entry in manifest.failed() {
                println!(
                    "   ⚠️  {}: {}",
                    entry.relative_path,
                    entry.error.as_deref().unwrap_or("failed")
                );
            }
            Ok(())
        }
        VaultCommands::Retrieve {
            token,
            blob,
            key,
            nonce,
            out,
        } => {
            let vault = Vault::new(vault_store(config)?);
            let (blob, key, nonce, filename) = match (token, blob, key, nonce) {
                (Some(token), _, _, _) => {
                    let cap = parse_share_token(&token)?;
                    (cap.blob_id, cap.key_hex, cap.nonce_hex, cap.filename)
                }
                (None, Some(blob), Some(key), Some(nonce)) => {
                    let name = blob.clone();
                    (blob, key, nonce, name)
                }
                _ => bail!("Provide --token, or --blob with --key and --nonce"),
            };
            let out = out.unwrap_or_else(|| default_output(&filename));
            let size = vault.retrieve_to_file(&blob, &key, &nonce, &out)?;
            println!("🔓 Wrote {} bytes to {}", size, out.display());
            Ok(())
        }
        VaultCommands::Inspect { token } => {
            let cap = parse_share_token(&token)?;
            println!("File:  {}", cap.filename);
            println!("Blob:  {}", cap.blob_id);
            println!("Key:   {}", cap.key_hex);
            println!("Nonce: {}", cap.nonce_hex);
            println!("Anyone holding this token can decrypt the file.");
            Ok(())
        }
    }
}

/// File name from a token, reduced to its last component.
fn default_output(filename: &str) -> PathBuf {
    Path::new(filename)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("retrieved.bin"))
}

fn cmd_stats(config: &Config) -> Result<()> {
    let ledger = open_ledger(config)?;
    let stats = ledger.statistics()?;
    println!("📊 Ledger statistics");
    println!("   Moved:           {}", stats.total_moved);
    println!("   Moved today:     {}", stats.moved_today);
    println!("   Duplicates:      {}", stats.total_duplicates);
    println!("   Errors:          {}", stats.total_errors);
    println!("   Bytes organized: {}", stats.total_size);
    println!("   Batch uploads:   {}", stats.uploads);
    println!("   Pending upload:  {}", stats.pending_upload);

    let breakdown = ledger.category_breakdown()?;
    if !breakdown.is_empty() {
        println!("\n   Category         Files      Bytes");
        for (category, cat) in breakdown {
            println!("   {:<16} {:>5} {:>10}", category, cat.count, cat.size);
        }
    }
    Ok(())
}

fn cmd_rules(config: &Config, command: RuleCommands) -> Result<()> {
    let ledger = open_ledger(config)?;
    let mut pipeline = Pipeline::from_config(config, ledger.clone())?;
    let Some(engine) = pipeline.workflows_mut() else {
        println!("Workflows are disabled in the configuration.");
        return Ok(());
    };

    match command {
        RuleCommands::List => {
            for rule in engine.rules() {
                let actions: Vec<&str> = rule.actions.iter().map(|a| a.kind()).collect();
                println!(
                    "{} {} [{:?}: {}] -> {}",
                    if rule.enabled { "✅" } else { "⏸️ " },
                    rule.name,
                    rule.trigger_type,
                    rule.trigger_value,
                    actions.join(", ")
                );
            }
            let recent = ledger.recent_executions(10)?;
            if !recent.is_empty() {
                println!("\nRecent executions:");
                for record in recent {
                    println!(
                        "   {} {} {} -> {}",
                        record.executed_at.format("%Y-%m-%d %H:%M:%S"),
                        if record.success { "ok " } else { "err" },
                        record.rule_name,
                        record.file_path
                    );
                }
            }
        }
        RuleCommands::Add { spec } => {
            let rule: RuleSpec = serde_json::from_str(&spec).context("Invalid rule JSON")?;
            let name = rule.name.clone();
            engine.add_rule(rule)?;
            println!("Saved rule {}", name);
        }
        RuleCommands::Enable { name } => report_toggle(&name, engine.toggle_rule(&name, true)?, "enabled"),
        RuleCommands::Disable { name } => report_toggle(&name, engine.toggle_rule(&name, false)?, "disabled"),
        RuleCommands::Remove { name } => report_toggle(&name, engine.remove_rule(&name)?, "removed"),
    }
    Ok(())
}

fn report_toggle(name: &str, found: bool, verb: &str) {
    if found {
        println!("Rule {} {}", name, verb);
    } else {
        println!("No rule named {}", name);
    }
}

fn cmd_report(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let pipeline = Pipeline::from_config(config, open_ledger(config)?)?;
    match pipeline.generate_report(date)? {
        Some(record) => {
            println!("📅 Report for {}", date);
            println!("   Files:     {}", record.summary.total_files);
            println!("   Bytes:     {}", record.summary.total_size);
            println!("   Root hash: {}", record.root_hash);
            match &record.blob_id {
                Some(id) => println!("   Blob:      {}", id),
                None => println!("   Blob:      upload failed"),
            }
        }
        None => println!("No files organized on {}", date),
    }
    Ok(())
}
