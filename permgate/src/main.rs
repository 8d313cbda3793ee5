use alloy_primitives::{Address, Selector};
use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use lib::artifacts;
use lib::config::DeployConfig;
use lib::ledger::LocalChain;
use lib::mask::GroupId;
use lib::mirror::{Callers, Mirror, SqliteStore};
use lib::orchestrator::{self, CacheStore, FileCache, ReconcileOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod options;

use options::{OptionsConfig, Resolved};

/// Deploy, configure and mirror group-bitmask permission managers.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Directory holding the options file and default state files
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct PathArgs {
    /// Deployment cache file
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Local chain state file
    #[arg(long, global = true)]
    chain: Option<PathBuf>,

    /// Mirror database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Account that sends deployments and transactions
    #[arg(long, global = true)]
    from: Option<Address>,
}

impl From<&PathArgs> for OptionsConfig {
    fn from(args: &PathArgs) -> Self {
        OptionsConfig {
            cache_path: args.cache.clone(),
            chain_path: args.chain.clone(),
            mirror_db: args.db.clone(),
            account: args.from,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy missing components and converge permissions to CONFIG
    Reconcile {
        config: PathBuf,
        /// Redeploy everything, ignoring cached deployments
        #[arg(long)]
        no_cache: bool,
        /// Do not ask before deploying or submitting
        #[arg(short, long)]
        yes: bool,
    },
    /// Show what reconcile would do without doing it
    Plan {
        config: PathBuf,
        #[arg(long)]
        no_cache: bool,
    },
    /// Remove ACCOUNT from ROLE
    Revoke {
        config: PathBuf,
        role: String,
        account: Address,
        #[arg(short, long)]
        yes: bool,
    },
    /// Whether ACCOUNT may call FUNCTION on COMPONENT
    Check {
        account: Address,
        component: String,
        function: String,
    },
    /// Off-chain mirror of the manager's event log
    #[command(subcommand)]
    Mirror(MirrorCommand),
    /// Save the given path and --from flags as defaults
    Options,
}

#[derive(Subcommand, Debug)]
enum MirrorCommand {
    /// Fold new manager events into the mirror database
    Sync,
    /// Read the mirrored projection
    #[command(subcommand)]
    Query(Query),
}

#[derive(Subcommand, Debug)]
enum Query {
    Group { id: GroupId },
    Membership { account: Address },
    Requirement { component: String, function: String },
    /// Who can call FUNCTION on COMPONENT
    Callers { component: String, function: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Interactive gate; anything but an explicit yes declines.
fn ask(prompt: &str) -> bool {
    print!("{prompt}? [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

/// Address and selector of `function` on the cached component `component`.
fn locate(cache: &FileCache, component: &str, function: &str) -> anyhow::Result<(Address, Selector)> {
    let record = cache
        .get(component)
        .ok_or_else(|| anyhow!("{component} is not deployed (see {})", cache.path().display()))?;
    let kind = component.split('-').next().unwrap_or(component);
    let artifact =
        artifacts::artifact(kind).ok_or_else(|| anyhow!("unknown component kind {kind}"))?;
    let selector = artifact
        .selector(function)
        .ok_or_else(|| anyhow!("{component} has no function {function}"))?;
    Ok((record.address, selector))
}

fn manager_address(cache: &FileCache) -> anyhow::Result<Address> {
    cache
        .get(artifacts::MANAGER)
        .map(|record| record.address)
        .ok_or_else(|| anyhow!("no manager deployed yet; run reconcile first"))
}

/// Saves the chain whatever `outcome` is, so deployments that landed before
/// a failure survive it. The reconcile error wins over a save error.
async fn persist<T, E>(chain: &LocalChain, path: &Path, outcome: Result<T, E>) -> anyhow::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let saved = chain.save(path).await;
    match (outcome, saved) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e.into()),
        (Err(e), Err(save)) => {
            error!("failed to save chain to {}: {save}", path.display());
            Err(e.into())
        }
    }
}

async fn load_config(path: &Path) -> anyhow::Result<DeployConfig> {
    DeployConfig::load(path)
        .await
        .with_context(|| format!("loading {}", path.display()))
}

async fn run(command: Command, paths: &Resolved, flags: &OptionsConfig) -> anyhow::Result<()> {
    match command {
        Command::Reconcile {
            config,
            no_cache,
            yes,
        } => {
            let config = load_config(&config).await?;
            let chain = LocalChain::load(&paths.chain_path, paths.account).await?;
            let mut cache = FileCache::open(&paths.cache_path).await?;
            let options = ReconcileOptions {
                no_cache,
                no_confirm: yes,
            };
            let outcome =
                orchestrator::reconcile(&config, &chain, &chain, &mut cache, &options, ask).await;
            let report = persist(&chain, &paths.chain_path, outcome).await?;

            for (name, address) in &report.deployments {
                let fresh = if report.deployed.contains(name) { " (new)" } else { "" };
                println!("{name}: {address}{fresh}");
            }
            match report.receipt {
                Some(receipt) => println!(
                    "applied {} operations in block {}",
                    report.operations.len(),
                    receipt.block
                ),
                None => println!("permissions already converged"),
            }
        }
        Command::Plan { config, no_cache } => {
            let config = load_config(&config).await?;
            let chain = LocalChain::load(&paths.chain_path, paths.account).await?;
            let cache = FileCache::open(&paths.cache_path).await?;
            let options = ReconcileOptions {
                no_cache,
                no_confirm: true,
            };
            let plan = orchestrator::plan(&config, &chain, &cache, &options).await?;
            for name in &plan.pending {
                println!("deploy {name}");
            }
            for op in &plan.operations {
                println!("{op}");
            }
            match plan.calldata() {
                Some(calldata) => println!("multicall: 0x{}", hex::encode(&calldata)),
                None if plan.pending.is_empty() => println!("nothing to do"),
                None => {}
            }
        }
        Command::Revoke {
            config,
            role,
            account,
            yes,
        } => {
            let config = load_config(&config).await?;
            let chain = LocalChain::load(&paths.chain_path, paths.account).await?;
            let cache = FileCache::open(&paths.cache_path).await?;
            let options = ReconcileOptions {
                no_cache: false,
                no_confirm: yes,
            };
            let receipt =
                orchestrator::revoke(&config, &chain, &cache, &role, account, &options, ask)
                    .await?;
            chain.save(&paths.chain_path).await?;
            match receipt {
                Some(receipt) => println!("revoked {role} from {account} in block {}", receipt.block),
                None => println!("{account} does not hold {role}"),
            }
        }
        Command::Check {
            account,
            component,
            function,
        } => {
            let chain = LocalChain::load(&paths.chain_path, paths.account).await?;
            let cache = FileCache::open(&paths.cache_path).await?;
            let (target, selector) = locate(&cache, &component, &function)?;
            let allowed = chain.check_access(account, target, selector).await?;
            println!(
                "{account} {} call {component}.{function}",
                if allowed { "may" } else { "may not" }
            );
        }
        Command::Mirror(command) => {
            let chain = LocalChain::load(&paths.chain_path, paths.account).await?;
            let cache = FileCache::open(&paths.cache_path).await?;
            if let Some(parent) = paths.mirror_db.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let store = SqliteStore::open(&paths.mirror_db)?;
            let mut mirror = Mirror::new(store, manager_address(&cache)?);
            match command {
                MirrorCommand::Sync => {
                    let report = mirror.sync(&chain).await?;
                    println!(
                        "{} events applied, {} skipped",
                        report.applied, report.skipped
                    );
                }
                MirrorCommand::Query(query) => query_mirror(&mirror, &cache, query)?,
            }
        }
        Command::Options => {
            let saved = options::load_options_config().await.merged(flags);
            let path = options::save_options_config(&saved).await?;
            println!("saved options to {}", path.display());
        }
    }
    Ok(())
}

fn query_mirror(
    mirror: &Mirror<SqliteStore>,
    cache: &FileCache,
    query: Query,
) -> anyhow::Result<()> {
    match query {
        Query::Group { id } => match mirror.group(id)? {
            Some(group) => println!("group {id}: admins {:?}", group.admins),
            None => println!("group {id}: no admins recorded"),
        },
        Query::Membership { account } => {
            println!("{account}: {:?}", mirror.membership(account)?);
        }
        Query::Requirement {
            component,
            function,
        } => {
            let (target, selector) = locate(cache, &component, &function)?;
            match mirror.requirement(target, selector)? {
                Some(groups) => println!("{component}.{function}: {groups:?}"),
                None => println!("{component}.{function}: unrestricted"),
            }
        }
        Query::Callers {
            component,
            function,
        } => {
            let (target, selector) = locate(cache, &component, &function)?;
            match mirror.callers(target, selector)? {
                Callers::Anyone => println!("anyone"),
                Callers::Accounts(accounts) if accounts.is_empty() => println!("nobody"),
                Callers::Accounts(accounts) => {
                    for account in accounts {
                        println!("{account}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(home) = &cli.home {
        options::initialize_home_directory(home);
    }
    let home = options::get_home_directory();
    let flags = OptionsConfig::from(&cli.paths);
    let paths = options::load_options_config().await.resolve(&flags, home);
    info!("using {} as {}", home.display(), paths.account);

    run(cli.command, &paths, &flags).await
}
