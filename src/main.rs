
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use vyapar::app::{self, App, AppError, Screen};
use vyapar::capture::{AudioSource, FileAudioSource, UnavailableAudioSource};
use vyapar::config::{ClientConfig, ConfigError};
use vyapar::expense::{ExpenseDraft, ValidationError, normalize_date};
use vyapar::repl::{self, ReplError};
use vyapar::session::{CredentialStore, FileCredentialStore, MemoryCredentialStore, Session};
use vyapar::transport::{HttpBackend, InvoiceDraft, Page, TransportError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in; run `vyapar login --email <email>` first")]
    NotLoggedIn,
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    App(#[from] AppError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Repl(#[from] ReplError),
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "vyapar", about = "VyaparAI expense assistant client")]
struct Cli {
    #[arg(long, env = "VYAPAR_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, help = "Keep the credential in memory only")]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the backend is reachable.
    Ping,
    /// Log in and store the access token.
    ///
    /// Without --password or VYAPAR_PASSWORD the password is read from stdin,
    /// and the terminal echoes what is typed.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VYAPAR_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account. The password and its confirmation are read from
    /// stdin, and the terminal echoes what is typed.
    Register {
        #[arg(long)]
        email: String,
    },
    Logout,
    /// Interactive chat with the assistant.
    Chat,
    Expenses(ExpensesCommand),
    Invoices(InvoicesCommand),
}

#[derive(Args, Debug)]
struct ExpensesCommand {
    #[command(subcommand)]
    command: ExpensesSubcommand,
}

#[derive(Subcommand, Debug)]
enum ExpensesSubcommand {
    List(PageArgs),
    Create {
        /// Account id the expense belongs to, as printed by `register`.
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        item: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        date: String,
    },
    Get {
        id: i64,
    },
    Update {
        id: i64,
        #[arg(long)]
        item: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        date: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct InvoicesCommand {
    #[command(subcommand)]
    command: InvoicesSubcommand,
}

#[derive(Subcommand, Debug)]
enum InvoicesSubcommand {
    List(PageArgs),
    Create {
        /// Account id the invoice belongs to, as printed by `register`.
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        customer_name: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        date: String,
    },
    Get {
        id: i64,
    },
    Update {
        id: i64,
        #[arg(long)]
        customer_name: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        date: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long, default_value_t = 0)]
    skip: u32,
    #[arg(long, default_value_t = 100)]
    limit: u32,
}

impl From<PageArgs> for Page {
    fn from(args: PageArgs) -> Self {
        Self { skip: args.skip, limit: args.limit }
    }
}

struct CliContext {
    config: ClientConfig,
    app: Arc<App>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }

    let store: Arc<dyn CredentialStore> = if cli.ephemeral {
        Arc::new(MemoryCredentialStore::default())
    } else {
        Arc::new(FileCredentialStore::in_home(&config.home))
    };
    let session = Arc::new(Session::restore(store));
    let backend = Arc::new(HttpBackend::from_config(&config)?);
    let app = Arc::new(App::new(backend, session));
    tracing::debug!(base_url = %config.base_url, "client configured");

    let ctx = CliContext { config, app };
    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Login { email, password } => run_login(&ctx, &email, password).await,
        Command::Register { email } => run_register(&ctx, &email).await,
        Command::Logout => {
            if ctx.app.logout() {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
            Ok(())
        }
        Command::Chat => run_chat(&ctx).await,
        Command::Expenses(expenses) => run_expenses(&ctx, expenses).await,
        Command::Invoices(invoices) => run_invoices(&ctx, invoices).await,
    }
}

async fn run_ping(ctx: &CliContext) -> Result<(), CliError> {
    let status = ctx.app.health().await?;
    print_json(&status)
}

async fn run_login(ctx: &CliContext, email: &str, password: Option<String>) -> Result<(), CliError> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };
    ctx.app.login(email, &password).await?;
    println!("Logged in as {}.", email.trim());
    Ok(())
}

async fn run_register(ctx: &CliContext, email: &str) -> Result<(), CliError> {
    let password = prompt("Password: ")?;
    let confirm = prompt("Confirm Password: ")?;
    let account = ctx.app.register(email, &password, &confirm).await?;
    println!("{}", app::REGISTERED);
    if let Some(id) = account.id {
        println!("Account id: {id}");
    }
    Ok(())
}

async fn run_chat(ctx: &CliContext) -> Result<(), CliError> {
    if ctx.app.screen() == Screen::Login {
        return Err(CliError::NotLoggedIn);
    }
    let audio: Arc<dyn AudioSource> = match &ctx.config.mic_file {
        Some(path) => Arc::new(FileAudioSource::new(path)),
        None => Arc::new(UnavailableAudioSource),
    };
    let chat = Arc::new(ctx.app.open_chat(audio, &ctx.config.from_number));
    repl::run(Arc::clone(&ctx.app), chat).await?;
    Ok(())
}

async fn run_expenses(ctx: &CliContext, expenses: ExpensesCommand) -> Result<(), CliError> {
    require_login(ctx)?;
    match expenses.command {
        ExpensesSubcommand::List(page) => print_json(&ctx.app.expenses(page.into()).await?),
        ExpensesSubcommand::Get { id } => print_json(&ctx.app.expense(id).await?),
        ExpensesSubcommand::Create { user_id, item, amount, date } => {
            let draft = ExpenseDraft { item, amount, date: normalize_date(&date)? };
            let created = ctx.app.create_expense(user_id, &draft).await?;
            eprintln!("{}", app::EXPENSE_CREATED);
            print_json(&created)
        }
        ExpensesSubcommand::Update { id, item, amount, date } => {
            let draft = ExpenseDraft { item, amount, date: normalize_date(&date)? };
            let updated = ctx.app.update_expense(id, &draft).await?;
            eprintln!("{}", app::EXPENSE_UPDATED);
            print_json(&updated)
        }
        ExpensesSubcommand::Delete { id } => {
            let removed = ctx.app.delete_expense(id).await?;
            eprintln!("{}", app::EXPENSE_DELETED);
            print_json(&removed)
        }
    }
}

async fn run_invoices(ctx: &CliContext, invoices: InvoicesCommand) -> Result<(), CliError> {
    require_login(ctx)?;
    match invoices.command {
        InvoicesSubcommand::List(page) => print_json(&ctx.app.invoices(page.into()).await?),
        InvoicesSubcommand::Get { id } => print_json(&ctx.app.invoice(id).await?),
        InvoicesSubcommand::Create { user_id, customer_name, amount, date } => {
            let draft = InvoiceDraft { date: normalize_date(&date)?, customer_name, amount };
            let created = ctx.app.create_invoice(user_id, &draft).await?;
            eprintln!("{}", app::INVOICE_CREATED);
            print_json(&created)
        }
        InvoicesSubcommand::Update { id, customer_name, amount, date } => {
            let draft = InvoiceDraft { date: normalize_date(&date)?, customer_name, amount };
            let updated = ctx.app.update_invoice(id, &draft).await?;
            eprintln!("{}", app::INVOICE_UPDATED);
            print_json(&updated)
        }
        InvoicesSubcommand::Delete { id } => {
            let removed = ctx.app.delete_invoice(id).await?;
            eprintln!("{}", app::INVOICE_DELETED);
            print_json(&removed)
        }
    }
}

fn require_login(ctx: &CliContext) -> Result<(), CliError> {
    if ctx.app.session().is_authenticated() { Ok(()) } else { Err(CliError::NotLoggedIn) }
}

/// Read one line from stdin. Input is echoed; there is no hidden-entry mode.
fn prompt(label: &str) -> Result<String, CliError> {
    let mut stderr = io::stderr();
    stderr.write_all(label.as_bytes())?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
