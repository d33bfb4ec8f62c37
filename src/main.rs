//! Infragraph CLI entrypoint.
//!
//! This is the main entrypoint for the infragraph command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use infragraph::cli::{Cli, Commands, OutputFormatter, StateCommands};
use infragraph::config::{
    ConfigParser, ConfigValidator, Configuration, Variables, find_config_file,
    parse_var_assignment,
};
use infragraph::engine::{Engine, RunContext, RunOptions};
use infragraph::error::{ConfigError, InfraError, Result};
use infragraph::planner::Plan;
use infragraph::provider::SimulatedProvider;
use infragraph::state::{LocalStateStore, MemoryStateStore, StateStore, generate_holder_id};
use infragraph::{NETWORK_TEMPLATE, ResourceAddress};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("INFRAGRAPH_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if std::env::var("INFRAGRAPH_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match &cli.command {
        Commands::Init { path, force } => cmd_init(path, *force),
        Commands::Validate { warnings } => cmd_validate(&cli, *warnings, &formatter),
        Commands::Plan {
            out,
            destroy,
            no_refresh,
        } => cmd_plan(&cli, out.as_deref(), *destroy, *no_refresh, &formatter).await,
        Commands::Apply {
            plan,
            yes,
            parallelism,
            no_refresh,
        } => {
            cmd_apply(&cli, plan.as_deref(), *yes, *parallelism, *no_refresh, &formatter).await
        }
        Commands::Destroy { yes, parallelism } => {
            cmd_destroy(&cli, *yes, *parallelism, &formatter).await
        }
        Commands::Output { name } => cmd_output(&cli, name.as_deref(), &formatter).await,
        Commands::Drift => cmd_drift(&cli, &formatter).await,
        Commands::State { command } => cmd_state(&cli, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new infragraph project in: {}", path.display());

    let config_path = path.join("infragraph.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, NETWORK_TEMPLATE)?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(
        &env_path,
        "# Variables can be supplied as INFRAGRAPH_VAR_<name>\nINFRAGRAPH_VAR_environment=dev\n",
    )?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(".infragraph") {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# infragraph")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(".infragraph") {
                writeln!(file, ".infragraph/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.infragraph/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set your variables");
    eprintln!("  2. Edit infragraph.yaml to describe your network");
    eprintln!("  3. Run 'infragraph validate' to check your configuration");
    eprintln!("  4. Run 'infragraph plan' to see what will change");
    eprintln!("  5. Run 'infragraph apply' to converge");

    Ok(())
}

/// Validate configuration.
fn cmd_validate(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, _) = load_config(cli)?;
    let result = ConfigValidator::new().validate(&config)?;

    // Binding and graph construction catch reference and cycle errors.
    let engine = Engine::new(
        config.clone(),
        RunContext::new(
            Arc::new(SimulatedProvider::network()),
            Arc::new(MemoryStateStore::new()),
            RunOptions::default().with_variables(supplied_variables(cli)?),
        ),
    );
    let (_, graph) = engine.graph()?;

    emit(&formatter.format_validation(&config, &result, graph.len(), show_warnings))
}

/// Show the execution plan.
async fn cmd_plan(
    cli: &Cli,
    out: Option<&Path>,
    destroy: bool,
    no_refresh: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let engine = build_engine(cli, None, no_refresh).await?;
    let plan = if destroy {
        engine.plan_destroy().await?
    } else {
        engine.plan().await?
    };

    emit(&formatter.format_plan(&plan))?;
    if cli.verbose && !formatter.is_json() {
        emit(&formatter.format_plan_details(&plan))?;
    }

    if let Some(path) = out {
        plan.save(path).await?;
        eprintln!("\nPlan saved to {}", path.display());
        eprintln!("Run 'infragraph apply {}' to apply it.", path.display());
    }
    Ok(())
}

/// Apply a saved plan, or plan and apply.
async fn cmd_apply(
    cli: &Cli,
    saved: Option<&Path>,
    auto_approve: bool,
    parallelism: Option<usize>,
    no_refresh: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let engine = build_engine(cli, parallelism, no_refresh).await?;

    let plan = match saved {
        Some(path) => Plan::load(path).await?,
        None => {
            let plan = engine.plan().await?;
            if plan.is_empty() || !formatter.is_json() {
                emit(&formatter.format_plan(&plan))?;
            }
            if plan.is_empty() {
                return Ok(());
            }
            if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
                eprintln!("Apply cancelled.");
                return Ok(());
            }
            plan
        }
    };

    let report = engine.apply(Some(&plan)).await?;
    emit(&formatter.format_report(&report))?;
    report.into_result().map(|_| ())
}

/// Destroy every recorded resource.
async fn cmd_destroy(
    cli: &Cli,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let engine = build_engine(cli, parallelism, false).await?;

    let plan = engine.plan_destroy().await?;
    if plan.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(());
    }
    if !formatter.is_json() {
        emit(&formatter.format_plan(&plan))?;
    }

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(());
    }

    let report = engine.apply(Some(&plan)).await?;
    emit(&formatter.format_report(&report))?;
    report.into_result().map(|_| ())
}

/// Show outputs.
async fn cmd_output(cli: &Cli, name: Option<&str>, formatter: &OutputFormatter) -> Result<()> {
    let engine = build_engine(cli, None, true).await?;
    let outputs = engine.outputs().await?;

    match name {
        Some(name) => {
            let value = outputs.get(name).ok_or_else(|| {
                InfraError::internal(format!("output '{name}' is not declared or has no value"))
            })?;
            emit(&formatter.format_output_value(value))
        }
        None => emit(&formatter.format_outputs(&outputs)),
    }
}

/// Check for drift.
async fn cmd_drift(cli: &Cli, formatter: &OutputFormatter) -> Result<()> {
    let engine = build_engine(cli, None, false).await?;
    let total = engine.context().store.load().await?.len();
    let drift = engine.drift().await?;
    emit(&formatter.format_drift(&drift, total))
}

/// State management commands.
async fn cmd_state(cli: &Cli, command: &StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let (config, config_file) = load_config(cli)?;
    let store = LocalStateStore::with_base_dir(state_dir(cli, &config, &config_file));

    match command {
        StateCommands::List => emit(&formatter.format_state_list(&store.load().await?))?,
        StateCommands::Show { address } => {
            let address = parse_address(address)?;
            match store.get(&address).await? {
                Some(record) => emit(&formatter.format_record(&record))?,
                None => eprintln!("No state recorded for {address}."),
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.clone().unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            eprintln!("State locked: {}", lock.lock_id);
        }
        StateCommands::Unlock { lock_id, force } => {
            if *force {
                emit(&formatter.format_lock(store.lock_info().await?.as_ref()))?;
                store.force_unlock().await?;
                eprintln!("State forcefully unlocked.");
            } else if let Some(id) = lock_id {
                store.release_lock(id).await?;
                eprintln!("State unlocked.");
            } else {
                emit(&formatter.format_lock(store.lock_info().await?.as_ref()))?;
                eprintln!("Please provide --lock-id or use --force");
            }
        }
        StateCommands::Rm { addresses } => {
            let lock = store.acquire_lock(&generate_holder_id()).await?;
            let mut result = Ok(());
            for raw in addresses {
                match parse_address(raw) {
                    Ok(address) => {
                        if let Err(e) = store.remove(&address).await {
                            result = Err(e);
                            break;
                        }
                        eprintln!("Removed {address} from state.");
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            store.release_lock(&lock.lock_id).await?;
            result?;
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

fn parse_address(raw: &str) -> Result<ResourceAddress> {
    raw.parse().map_err(|message| {
        InfraError::Config(ConfigError::Invalid {
            field: String::from("address"),
            message,
        })
    })
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` and the configuration.
fn load_config(cli: &Cli) -> Result<(Configuration, PathBuf)> {
    let config_file = resolve_config_path(cli.config.as_ref())?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(base_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_file(&config_file)?;
    Ok((config, config_file))
}

fn base_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Variables from `--var-file` and `--var`, later values winning.
fn supplied_variables(cli: &Cli) -> Result<Variables> {
    let parser = ConfigParser::new();
    let mut variables = Variables::new();
    for path in &cli.var_files {
        variables.extend(parser.load_var_file(path)?);
    }
    for raw in &cli.vars {
        let (name, value) = parse_var_assignment(raw)?;
        variables.insert(name, value);
    }
    Ok(variables)
}

fn state_dir(cli: &Cli, config: &Configuration, config_file: &Path) -> PathBuf {
    cli.state_dir.clone().unwrap_or_else(|| {
        let dir = PathBuf::from(config.state.dir());
        if dir.is_absolute() {
            dir
        } else {
            base_dir(config_file).join(dir)
        }
    })
}

/// Loads the configuration and wires the provider, the state store and
/// Ctrl-C cancellation into an engine.
async fn build_engine(cli: &Cli, parallelism: Option<usize>, no_refresh: bool) -> Result<Engine> {
    let (config, config_file) = load_config(cli)?;
    let state_dir = state_dir(cli, &config, &config_file);
    debug!("Using state directory: {}", state_dir.display());

    let mut options = RunOptions::from_config(&config).with_variables(supplied_variables(cli)?);
    if let Some(parallelism) = parallelism {
        options = options.with_parallelism(parallelism);
    }
    if no_refresh {
        options = options.with_refresh(false);
    }
    if let Some(secs) = cli.lock_timeout {
        options = options.with_lock_timeout(Duration::from_secs(secs));
    }

    let provider = SimulatedProvider::network()
        .with_snapshot(state_dir.join("provider.json"))
        .await?;
    let store: Arc<dyn StateStore> = Arc::new(LocalStateStore::with_base_dir(&state_dir));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight operations");
            on_signal.cancel();
        }
    });

    let context = RunContext::new(Arc::new(provider), store, options).with_cancellation(cancel);
    Ok(Engine::new(config, context))
}
