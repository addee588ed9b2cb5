// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use portal_client::{ApiClient, ClientConfig, PendingCall, RegisterRequest, SessionObserver};

#[derive(Debug, Parser)]
#[command(name = "portal", version, about = "Command-line client for the school portal API.")]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    /// Log filter directive.
    #[arg(long, default_value = "warn", env = "PORTAL_LOG")]
    log_level: String,

    /// Log output format (text or json).
    #[arg(long, default_value = "text", env = "PORTAL_LOG_FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store credentials.
    Login {
        email: String,
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
        /// Use the admin login endpoint.
        #[arg(long)]
        admin: bool,
    },
    /// Register a new applicant account.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        student_name: String,
        #[arg(long, default_value = "")]
        parent_name: String,
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, env = "PORTAL_PARENT_PASSWORD", hide_env_values = true)]
        parent_password: String,
    },
    /// Show the current user.
    Me,
    /// GET an API path and print the JSON response.
    Get {
        path: String,
        /// Query parameter as key=value. Repeatable.
        #[arg(long = "query", short = 'q')]
        query: Vec<String>,
    },
    /// POST a JSON body to an API path and print the JSON response.
    Post {
        path: String,
        #[arg(default_value = "{}")]
        body: String,
    },
    /// Forget the session.
    Logout,
    /// Show whether credentials are stored.
    Status,
}

/// Prints a hint when the session ends mid-command.
struct CliObserver;

impl SessionObserver for CliObserver {
    fn current_location(&self) -> Option<String> {
        None
    }

    fn on_terminated(&self, _target: &str) {
        eprintln!("session expired, run `portal login` to sign in again");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let api = ApiClient::builder(cli.config).observer(Arc::new(CliObserver)).build()?;

    match cli.command {
        Command::Login { email, password, admin } => {
            let payload = if admin {
                api.admin_login(&email, &password).await?
            } else {
                api.login(&email, &password).await?
            };
            let role = payload.user.role().map(|r| r.to_string()).unwrap_or_else(|| "none".into());
            println!("logged in as {} (role {role}, landing {})", payload.user.email, payload.user.landing_route());
        }
        Command::Register { email, phone, student_name, parent_name, password, parent_password } => {
            let req = RegisterRequest {
                email,
                phone,
                student_full_name: student_name,
                parent_full_name: parent_name,
                password,
                parent_password,
            };
            let payload = api.register(&req).await?;
            println!("registered {} (landing {})", payload.user.email, payload.user.landing_route());
        }
        Command::Me => {
            let me = api.me().await?;
            println!("{}", serde_json::to_string_pretty(&me)?);
        }
        Command::Get { path, query } => {
            let mut call = PendingCall::get(path);
            for pair in query {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("query must be key=value: {pair}"))?;
                call = call.with_query(key, value);
            }
            let value: serde_json::Value = api.call_json(call).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Post { path, body } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            let value: serde_json::Value = api.post_json(&path, &body).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Logout => {
            api.logout().await?;
            println!("logged out");
        }
        Command::Status => {
            let pair = api.store().get();
            let state = if pair.access.is_some() { "logged in" } else { "logged out" };
            println!("{state}");
            println!("api:         {}", api.config().base_url());
            println!("credentials: {}", api.config().credential_path().display());
            println!("refresh:     {}", if pair.refresh.is_some() { "present" } else { "absent" });
        }
    }

    Ok(())
}
