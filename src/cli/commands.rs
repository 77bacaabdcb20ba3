//! CLI command definitions for qless.
//!
//! Every command connects with [`ClientConfig::from_env`], applies the
//! connection flags on top, runs one operation and prints the result as
//! JSON on stdout.

use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::client::{Client, Lookup, PutOptions};
use crate::config::ClientConfig;

/// Command-line client for qless job queues.
#[derive(Parser)]
#[command(name = "qless")]
#[command(about = "Inspect and drive qless job queues stored in Redis")]
#[command(version)]
#[command(
    long_about = "qless talks to a Redis server running the qless script library.\n\nConnection settings come from QLESS_* environment variables and can be overridden with flags.\n\nExample usage:\n  qless --redis-url redis://localhost:6379/0 queues\n  qless put email Mailer --data '{\"to\":\"a@example.com\"}'"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis URL; overrides QLESS_HOST, QLESS_PORT and QLESS_DB.
    #[arg(long, env = "QLESS_REDIS_URL", global = true)]
    pub redis_url: Option<String>,

    /// Path to the qless script library.
    #[arg(long, env = "QLESS_SCRIPT_PATH", global = true)]
    pub script_path: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Show a job or recurring job.
    Get(JidArgs),

    /// List queues with their job counts.
    Queues(QueuesArgs),

    /// Enqueue a job.
    Put(PutArgs),

    /// Cancel a job.
    Cancel(JidArgs),

    /// Start tracking a job.
    Track(JidArgs),

    /// Stop tracking a job.
    Untrack(JidArgs),

    /// List tracked jobs.
    Tracked,

    /// List jids carrying a tag.
    Tagged(TaggedArgs),

    /// List completed jids.
    Completed(PageArgs),

    /// Read or change config options.
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct JidArgs {
    /// Job identifier.
    pub jid: String,
}

#[derive(Parser, Debug)]
pub struct QueuesArgs {
    /// Only show this queue.
    pub name: Option<String>,
}

#[derive(Parser, Debug)]
pub struct PutArgs {
    /// Queue to put the job into.
    pub queue: String,

    /// Job class.
    pub klass: String,

    /// JSON payload.
    #[arg(short, long, default_value = "{}")]
    pub data: String,

    /// Explicit jid; generated when omitted.
    #[arg(long)]
    pub jid: Option<String>,

    /// Seconds before the job becomes eligible.
    #[arg(long, default_value = "0")]
    pub delay: i64,

    #[arg(long)]
    pub priority: Option<i64>,

    #[arg(long)]
    pub retries: Option<i64>,

    /// Comma-separated tags.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Comma-separated jids this job depends on.
    #[arg(long, value_delimiter = ',')]
    pub depends: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct PageArgs {
    #[arg(long, default_value = "0")]
    pub start: usize,

    #[arg(long, default_value = "25")]
    pub count: usize,
}

#[derive(Parser, Debug)]
pub struct TaggedArgs {
    pub tag: String,

    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Print an option's value.
    Get { option: String },

    /// Set an option.
    Set { option: String, value: String },

    /// Reset an option to its default.
    Unset { option: String },
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let client = Client::connect(config).await?;

    let output = match cli.command {
        Commands::Get(args) => match client.get(&args.jid).await? {
            Lookup::Job(job) => serde_json::to_value(job)?,
            Lookup::Recurring(job) => serde_json::to_value(job)?,
        },
        Commands::Queues(args) => {
            let queues = client.queues(args.name.as_deref().unwrap_or("")).await?;
            serde_json::to_value(queues)?
        }
        Commands::Put(args) => run_put_command(&client, args).await?,
        Commands::Cancel(args) => {
            let mut job = client.get_job(&args.jid).await?;
            job.cancel().await?;
            info!(jid = %args.jid, "Cancelled job");
            json!({ "cancelled": args.jid })
        }
        Commands::Track(args) => json!({ "tracked": client.track(&args.jid).await? }),
        Commands::Untrack(args) => json!({ "untracked": client.untrack(&args.jid).await? }),
        Commands::Tracked => {
            let tracked = client.tracked().await?;
            json!({ "jobs": tracked.jobs, "expired": tracked.expired })
        }
        Commands::Tagged(args) => {
            let reply = client
                .tagged(&args.tag, args.page.start, args.page.count)
                .await?;
            json!({ "total": reply.total, "jobs": reply.jobs })
        }
        Commands::Completed(args) => {
            serde_json::to_value(client.completed(args.start, args.count).await?)?
        }
        Commands::Config(args) => run_config_command(&client, args.command).await?,
    };

    print_json(&output)
}

fn build_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_env()?;
    if let Some(ref url) = cli.redis_url {
        config = config.with_redis_url(url.clone());
    }
    if let Some(ref path) = cli.script_path {
        config = config.with_script_path(path.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run_put_command(client: &Client, args: PutArgs) -> anyhow::Result<Value> {
    let data: Value = serde_json::from_str(&args.data)
        .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {}", e))?;

    let mut options = PutOptions::new()
        .with_delay(args.delay)
        .with_tags(args.tags)
        .with_depends(args.depends);
    if let Some(jid) = args.jid {
        options = options.with_jid(jid);
    }
    if let Some(priority) = args.priority {
        options = options.with_priority(priority);
    }
    if let Some(retries) = args.retries {
        options = options.with_retries(retries);
    }

    let jid = client
        .queue(args.queue.as_str())
        .put(&args.klass, &data, options)
        .await?;
    info!(jid = %jid, queue = %args.queue, "Put job");
    Ok(json!({ "jid": jid }))
}

async fn run_config_command(client: &Client, command: ConfigSubcommand) -> anyhow::Result<Value> {
    match command {
        ConfigSubcommand::Get { option } => {
            let value = client.get_config(&option).await?;
            Ok(json!({ option: value }))
        }
        ConfigSubcommand::Set { option, value } => {
            client.set_config(&option, &value).await?;
            Ok(json!({ option: value }))
        }
        ConfigSubcommand::Unset { option } => {
            client.unset_config(&option).await?;
            Ok(json!({ "unset": option }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
