pub mod backups;
pub mod daemon;
pub mod jobs;

use clap::{Parser, Subcommand};
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::server::routes::ErrorResponse;

/// PostgreSQL backup manager: scheduled pg_dump backups to local disk or S3
#[derive(Parser, Debug)]
#[command(
    name = "pgbm",
    version,
    about = "PostgreSQL backup manager: scheduled pg_dump backups to local disk or S3"
)]
pub struct Cli {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Daemon port
    #[arg(long, default_value_t = 8080, global = true)]
    pub port: u16,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground
    Start {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long = "listen-port")]
        listen_port: Option<u16>,
    },

    /// Run one backup in this process and wait for the result
    Backup {
        /// Dump the schema only
        #[arg(long)]
        no_data: bool,

        /// Dump the data only
        #[arg(long)]
        no_schema: bool,

        /// Write a plain .sql file instead of .sql.gz
        #[arg(long)]
        no_compress: bool,

        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },

    /// Show the most recent backups
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch a stored backup artifact
    Download {
        /// Backup record id
        id: i64,

        /// Output file (defaults to the backup's file name)
        #[arg(short = 'o', long)]
        output: Option<String>,
    },

    /// Remove a backup from the history (the artifact is kept)
    Delete {
        /// Backup record id
        id: i64,
    },

    /// Manage scheduled backup jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Show daemon status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List scheduled jobs
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add a scheduled job
    Add {
        /// Job name
        #[arg(long)]
        name: String,

        /// Cron expression (5 fields)
        #[arg(long)]
        schedule: String,

        /// Human-readable description of the schedule
        #[arg(long)]
        label: Option<String>,

        /// Create the job paused
        #[arg(long)]
        disabled: bool,
    },

    /// Pause or resume a job
    Toggle {
        /// Job id
        id: i64,
    },

    /// Remove a job
    Remove {
        /// Job id
        id: i64,
    },
}

/// Build the base URL for the daemon API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to pgbm daemon at {}:{}. Is it running? (try: pgbm start)",
        host, port
    )
}

/// Map reqwest errors to user-friendly messages.
pub fn handle_request_error(e: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if e.is_connect() || e.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", e)
    }
}

/// Turn a non-2xx response into an error carrying the daemon's message.
pub(crate) async fn ensure_success(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|body| body.message)
        .unwrap_or_else(|_| format!("Daemon returned {}", status));
    anyhow::bail!("{}", message)
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let response = ensure_success(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))
}

/// Dispatch CLI commands.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    let host = &cli.host;
    let port = cli.port;

    match &cli.command {
        Some(Commands::Start {
            config,
            data_dir,
            listen_port,
        }) => daemon::cmd_start(config.as_deref(), data_dir.as_deref(), *listen_port).await,
        Some(Commands::Backup {
            no_data,
            no_schema,
            no_compress,
            config,
            data_dir,
        }) => {
            daemon::cmd_backup(
                config.as_deref(),
                data_dir.as_deref(),
                daemon::BackupFlags {
                    no_data: *no_data,
                    no_schema: *no_schema,
                    no_compress: *no_compress,
                },
            )
            .await
        }
        Some(Commands::History { json }) => backups::cmd_history(host, port, *json).await,
        Some(Commands::Download { id, output }) => {
            backups::cmd_download(host, port, *id, output.as_deref()).await
        }
        Some(Commands::Delete { id }) => backups::cmd_delete(host, port, *id).await,
        Some(Commands::Jobs { command }) => match command {
            JobsCommand::List { json } => jobs::cmd_list(host, port, *json).await,
            JobsCommand::Add {
                name,
                schedule,
                label,
                disabled,
            } => jobs::cmd_add(host, port, name, schedule, label.as_deref(), *disabled).await,
            JobsCommand::Toggle { id } => jobs::cmd_toggle(host, port, *id).await,
            JobsCommand::Remove { id } => jobs::cmd_remove(host, port, *id).await,
        },
        Some(Commands::Status) => daemon::cmd_status(host, port, cli.verbose).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
