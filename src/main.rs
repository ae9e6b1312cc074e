//! procvault CLI Entry Point
//!
//! Subcommands:
//! - `proc` - Execute a stored procedure (blank name: password-only mode)
//! - `sql` - Execute a SQL statement or script
//! - `vault` - Retrieve a database password from Vault
//!
//! Results go to stdout (text or JSON). Logs go to stderr.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use procvault::config;
use procvault::credential::{ConsolePrompter, PasswordPrompter};
use procvault::service::{
    DatabaseTarget, ExecutionService, ProcedureRequest, SqlRequest, VaultParams, VaultRequest,
};
use procvault::{DbType, ExecutionResult};

/// procvault - stored procedure and SQL executor with Vault-resolved credentials
#[derive(Parser)]
#[command(name = "procvault")]
#[command(about = "Execute Oracle stored procedures and SQL with credentials resolved from Vault")]
#[command(version)]
struct Cli {
    /// Explicit config file (otherwise PROCVAULT_CONFIG, then local + global files)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Result format on stdout
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    /// Log format on stderr
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    log_format: Format,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Never prompt for a password
    #[arg(long, global = true)]
    no_prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a stored procedure
    Proc {
        /// Procedure name (e.g. SCHEMA.PKG.PROC); omit for password-only mode
        procedure: Option<String>,

        /// IN parameters: name:type:value[,name:type:value...]
        #[arg(short, long)]
        input: Option<String>,

        /// OUT parameters: name:type[,name:type...]
        #[arg(short, long)]
        output: Option<String>,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Execute a SQL statement or script
    Sql {
        /// SQL statement; omit (with no script) for password-only mode
        sql: Option<String>,

        /// SQL script file, statements separated by ';'
        #[arg(long, conflicts_with = "sql")]
        script: Option<PathBuf>,

        /// Positional parameters: name:type:value[,name:type:value...]
        #[arg(short, long)]
        params: Option<String>,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Retrieve a database password from Vault
    Vault {
        /// Use the configured registry instead of direct parameters
        #[arg(long)]
        lookup: bool,

        #[command(flatten)]
        db: DbArgs,
    },
}

#[derive(Args)]
struct DbArgs {
    /// Database type (oracle, sqlite)
    #[arg(short = 't', long = "type", default_value = "oracle")]
    db_type: String,

    /// Logical database id
    #[arg(short, long)]
    database: String,

    /// Database user
    #[arg(short, long)]
    user: String,

    /// Direct host (skips LDAP lookup)
    #[arg(long)]
    host: Option<String>,

    /// Vault base URL
    #[arg(long)]
    vault_url: Option<String>,

    /// Vault AppRole role id
    #[arg(long)]
    role_id: Option<String>,

    /// Vault AppRole secret id
    #[arg(long)]
    secret_id: Option<String>,

    /// Application identifier token
    #[arg(long)]
    ait: Option<String>,
}

impl DbArgs {
    fn vault(&self) -> VaultParams {
        VaultParams {
            vault_url: self.vault_url.clone(),
            role_id: self.role_id.clone(),
            secret_id: self.secret_id.clone(),
            ait: self.ait.clone(),
        }
    }

    fn target(&self) -> procvault::Result<DatabaseTarget> {
        Ok(DatabaseTarget {
            db_type: self.db_type.parse::<DbType>()?,
            database: self.database.clone(),
            user: self.user.clone(),
            host: self.host.clone(),
        })
    }
}

fn init_tracing(verbose: u8, format: Format) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        Format::Text => registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init(),
        Format::Json => registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init(),
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Proc { .. } => "proc",
        Commands::Sql { .. } => "sql",
        Commands::Vault { .. } => "vault",
    }
}

async fn run(cli: &Cli) -> ExecutionResult {
    let config = match config::load_with_precedence(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return ExecutionResult::from_error(&e),
    };
    let prompter: Option<Box<dyn PasswordPrompter>> =
        if cli.no_prompt { None } else { Some(Box::new(ConsolePrompter)) };
    let service = ExecutionService::new(config, prompter);

    match &cli.command {
        Commands::Proc { procedure, input, output, db } => {
            let target = match db.target() {
                Ok(target) => target,
                Err(e) => return ExecutionResult::from_error(&e),
            };
            let request = ProcedureRequest {
                target,
                vault: db.vault(),
                procedure: procedure.clone().unwrap_or_default(),
                in_spec: input.clone(),
                out_spec: output.clone(),
            };
            service.execute_procedure(&request).await
        }
        Commands::Sql { sql, script, params, db } => {
            let target = match db.target() {
                Ok(target) => target,
                Err(e) => return ExecutionResult::from_error(&e),
            };
            let request = SqlRequest {
                target,
                vault: db.vault(),
                sql: sql.clone(),
                script: script.clone(),
                params: params.clone(),
            };
            service.execute_sql(&request).await
        }
        Commands::Vault { lookup, db } => {
            let request = VaultRequest {
                user: db.user.clone(),
                database: db.database.clone(),
                vault: db.vault(),
                lookup: *lookup,
            };
            service.retrieve_password(&request).await
        }
    }
}

fn database_of(command: &Commands) -> &str {
    match command {
        Commands::Proc { db, .. } | Commands::Sql { db, .. } | Commands::Vault { db, .. } => &db.database,
    }
}

fn emit(cli: &Cli, result: &ExecutionResult, execution_ms: u64) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.format {
        Format::Text => {
            let stderr = std::io::stderr();
            let mut err = stderr.lock();
            result.write_text(&mut out, &mut err).context("writing result")?;
        }
        Format::Json => {
            let envelope = result.to_envelope(command_name(&cli.command), database_of(&cli.command), execution_ms);
            writeln!(out, "{envelope}").context("writing JSON envelope")?;
        }
    }
    out.flush().context("flushing stdout")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let start = Instant::now();
    let result = run(&cli).await;
    let execution_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Err(e) = emit(&cli, &result, execution_ms) {
        eprintln!("[ERROR] {e:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1))
}
