use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use covtree_indexer::{
    ConfigStore, CoverageConfig, CoverageTreeProvider, JsonCoverageSource, NotifyEventSource,
    RefreshOrchestrator, ShellCommandRunner, WalkFileLister,
};
use covtree_protocol::{serialize_json_pretty, MonitoredRoot, RefreshReason};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod report;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "covtree")]
#[command(about = "Live coverage tree for one or more project roots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON or TOML). Defaults to ./covtree.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the coverage tree once and print it
    Tree(TreeArgs),

    /// Keep the tree in sync with coverage files and print a summary after each rebuild
    Watch(WatchArgs),

    /// Run the configured coverage command of every root
    Generate(GenerateArgs),
}

#[derive(Args)]
struct TreeArgs {
    /// Monitored roots
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Print JSON instead of the indented tree
    #[arg(long)]
    json: bool,

    /// Maximum number of levels below the root folders (1 = root folders only)
    #[arg(long)]
    depth: Option<usize>,
}

#[derive(Args)]
struct WatchArgs {
    /// Monitored roots
    #[arg(required = true)]
    roots: Vec<PathBuf>,
}

#[derive(Args)]
struct GenerateArgs {
    /// Monitored roots
    #[arg(required = true)]
    roots: Vec<PathBuf>,
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON parsing.
    if matches!(&cli.command, Commands::Tree(args) if args.json) {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config_path = cli.config.clone();
    match cli.command {
        Commands::Tree(args) => run_tree(args, config_path.as_deref()).await?,
        Commands::Watch(args) => run_watch(args, config_path.as_deref()).await?,
        Commands::Generate(args) => run_generate(args, config_path.as_deref()).await?,
    }

    Ok(())
}

fn resolve_roots(paths: &[PathBuf]) -> Result<Vec<MonitoredRoot>> {
    paths
        .iter()
        .map(|path| {
            let canonical = fs::canonicalize(path)
                .with_context(|| format!("Failed to resolve root {}", path.display()))?;
            if !canonical.is_dir() {
                anyhow::bail!("Root {} is not a directory", canonical.display());
            }
            Ok(MonitoredRoot::from_path(canonical))
        })
        .collect()
}

fn load_config(explicit: Option<&Path>, roots: &[MonitoredRoot]) -> Result<ConfigStore> {
    let mut config = match explicit {
        Some(path) => CoverageConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            CoverageConfig::discover(&cwd).context("Failed to load covtree.toml")?
        }
    };
    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(ConfigStore::from_config(&config, roots))
}

fn build_provider(
    roots: &[PathBuf],
    config_path: Option<&Path>,
) -> Result<(CoverageTreeProvider, ConfigStore)> {
    let roots = resolve_roots(roots)?;
    let config = load_config(config_path, &roots)?;
    let provider = CoverageTreeProvider::new(
        roots,
        config.clone(),
        Arc::new(JsonCoverageSource::new(config.clone())),
        Arc::new(WalkFileLister),
        Arc::new(ShellCommandRunner),
    );
    Ok((provider, config))
}

async fn run_tree(args: TreeArgs, config_path: Option<&Path>) -> Result<()> {
    let (provider, _) = build_provider(&args.roots, config_path)?;
    let tree = provider.rebuild(RefreshReason::Manual).await;

    if args.json {
        let output = report::TreeOutput::new(&tree, args.depth);
        print_stdout(&serialize_json_pretty(&output)?)?;
    } else {
        print_stdout(&report::render_tree(&tree, args.depth))?;
    }
    Ok(())
}

async fn run_watch(args: WatchArgs, config_path: Option<&Path>) -> Result<()> {
    let (provider, config) = build_provider(&args.roots, config_path)?;
    let (orchestrator, refreshes) = RefreshOrchestrator::start(
        provider.roots(),
        &config,
        Arc::new(NotifyEventSource::default()),
    )
    .context("Failed to start watching coverage files")?;

    let mut updates = provider.subscribe();
    let worker = provider.run(refreshes);
    orchestrator
        .force_refresh(RefreshReason::Manual)
        .await
        .context("Failed to request initial build")?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                log::info!("Stopping watch");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let tree = updates.borrow_and_update().clone();
                let reason = tree.reason.map_or("initial", |reason| reason.as_str());
                print_stdout(&format!("{reason}: {}", report::render_summary(&tree.report)))?;
            }
        }
    }

    orchestrator.shutdown().await;
    worker.await.context("Provider loop failed")?;
    Ok(())
}

async fn run_generate(args: GenerateArgs, config_path: Option<&Path>) -> Result<()> {
    let (provider, _) = build_provider(&args.roots, config_path)?;
    let output = provider
        .generate_coverage()
        .await
        .context("Coverage generation failed")?;
    print_stdout(output.trim_end())?;
    Ok(())
}
