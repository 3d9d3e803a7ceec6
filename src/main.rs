//! # chemreg CLI
//!
//! The `chemreg` binary is a terminal front end for the chemical-substance
//! registry: session management, registry search, passport records, bulk
//! import, downloads, attachments and support tickets.
//!
//! ## Usage
//!
//! ```bash
//! chemreg --config ./config/chemreg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chemreg login <user>` | Obtain and store a session |
//! | `chemreg logout` | Forget the stored session |
//! | `chemreg whoami` | Show the current user and organization |
//! | `chemreg register` | Register a new organization account |
//! | `chemreg profile` | Show or update the profile |
//! | `chemreg search [text]` | Search the public registry |
//! | `chemreg facets [text]` | Facet counts for a text search |
//! | `chemreg suggest <text>` | Name/CAS suggestions |
//! | `chemreg columns` | Registry table columns |
//! | `chemreg get <id>` | Show a substance passport |
//! | `chemreg save <file>` | Create or update a passport from JSON |
//! | `chemreg import <file>` | Bulk import from a spreadsheet |
//! | `chemreg template` | Download the import template |
//! | `chemreg passport <id>` | Download a passport PDF |
//! | `chemreg attach` / `detach` | Manage passport attachments |
//! | `chemreg structure <id> <image>` | Upload a structure image |
//! | `chemreg stats` | Registry statistics |
//! | `chemreg support` | Open a support ticket |
//!
//! ## Examples
//!
//! ```bash
//! chemreg login operator
//! chemreg search ацетон --filter hazard_class=3
//! chemreg get 42 --flat
//! chemreg import substances.xlsx --progress json
//! ```

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chemreg::config;
use chemreg::get;
use chemreg::import::{ImportPhase, ImportPoller, PollSettings};
use chemreg::models::{
    Company, DocType, Download, ProfileUpdate, Registration, SupportTicket, UploadFile,
};
use chemreg::progress::ProgressMode;
use chemreg::search;
use chemreg::session::{AppContext, Claims};
use chemreg::stats;

/// chemreg: client for the chemical-substance passport registry.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chemreg.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "chemreg",
    about = "Client for the chemical-substance passport registry",
    version,
    long_about = "chemreg talks to the registry API: search the public registry with \
    facets, read and submit substance passports, run spreadsheet bulk imports and \
    follow them to completion, and download templates and passport PDFs."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/chemreg.toml`. Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/chemreg.toml")]
    config: PathBuf,

    /// Verbose diagnostics on stderr (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session.
    ///
    /// The password is read from `--password` or, when absent, from the
    /// first line of stdin.
    Login {
        username: String,
        #[arg(long)]
        password: Option<String>,
    },

    /// Forget the stored session and cached data.
    Logout,

    /// Show the logged-in user, organization and token expiry.
    Whoami,

    /// Register a new organization account.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        company: String,
        /// Taxpayer identification number.
        #[arg(long, default_value = "")]
        inn: String,
        #[arg(long, default_value = "")]
        address: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long)]
        manufacturer: bool,
        #[arg(long)]
        importer: bool,
        #[arg(long)]
        exporter: bool,
    },

    /// Show the profile, or update it when any option is given.
    Profile {
        #[arg(long)]
        email: Option<String>,
        /// Company field to change, e.g. `--set phone=+7...` (repeatable).
        #[arg(long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
        /// Company logo image.
        #[arg(long)]
        logo: Option<PathBuf>,
    },

    /// Search the public registry.
    ///
    /// Filters are `key=value` pairs as listed by `chemreg facets`; one value
    /// per key, the last one given wins.
    Search {
        text: Option<String>,
        #[arg(long = "filter", short = 'f', value_parser = parse_key_val)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
    },

    /// Facet counts for a text search.
    Facets {
        text: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Name and CAS number suggestions.
    Suggest { text: String },

    /// Columns of the registry table.
    Columns,

    /// Show a substance passport.
    Get {
        id: i64,
        /// Merge all sections into one field list.
        #[arg(long)]
        flat: bool,
        #[arg(long)]
        json: bool,
    },

    /// Create or update a passport from a JSON file.
    Save {
        file: PathBuf,
        /// Update this element instead of creating one.
        #[arg(long)]
        id: Option<i64>,
    },

    /// Import substances from a spreadsheet and wait for the result.
    Import {
        file: PathBuf,
        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Download the import spreadsheet template.
    Template {
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Download a passport PDF.
    Passport {
        id: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Attach a document to a passport.
    Attach {
        id: i64,
        file: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
        /// PASSPORT, CERTIFICATE, LAB_PROTOCOL, DECLARATION or OTHER.
        #[arg(long, default_value = "OTHER")]
        doc_type: DocType,
    },

    /// Remove an attachment from a passport.
    Detach { id: i64, attachment_id: i64 },

    /// Upload a structure image for a passport.
    Structure { id: i64, image: PathBuf },

    /// Registry statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Open a support ticket.
    Support {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print shell completions.
    Completions { shell: clap_complete::Shell },
}

/// Parse a `key=value` pair for `--filter` and `--set` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "chemreg=debug" } else { "chemreg=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_password(given: Option<String>) -> Result<String> {
    if let Some(p) = given {
        return Ok(p);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given (use --password or pipe it on stdin)");
    }
    Ok(password)
}

async fn read_upload(path: &Path) -> Result<UploadFile> {
    UploadFile::from_path(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Write a download to `out`, the server-suggested name, or `fallback`.
fn save_download(download: Download, out: Option<PathBuf>, fallback: String) -> Result<PathBuf> {
    let path = out.unwrap_or_else(|| {
        let suggested = download
            .file_name
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(fallback);
        PathBuf::from(suggested)
    });
    std::fs::write(&path, &download.bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

async fn run_import(ctx: &AppContext, file: &Path, progress: Option<ProgressMode>) -> Result<()> {
    let upload = read_upload(file).await?;
    let reporter = progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let poller = ImportPoller::new(
        Arc::new(ctx.client().clone()),
        PollSettings::from(&ctx.config.import),
    );
    let mut rx = poller.subscribe();
    poller.select_file(upload);
    poller.start();

    let last = loop {
        let state = rx.borrow_and_update().clone();
        reporter.report(&state);
        if state.phase.is_terminal() || rx.changed().await.is_err() {
            break state;
        }
    };
    poller.dispose();

    let summary = last.summary();
    if let Some(summary) = &summary {
        println!("{}", summary);
        for err in &summary.errors {
            println!("  - {}", err);
        }
    }
    match last.phase {
        ImportPhase::Succeeded => Ok(()),
        ImportPhase::Failed(why) => bail!("{}", why),
        other => bail!("import stopped while {}", other.name()),
    }
}

async fn run_whoami(ctx: &AppContext) -> Result<()> {
    let Some(tokens) = ctx.tokens().tokens() else {
        println!("Not logged in.");
        return Ok(());
    };
    let profile = ctx.profile().await?;
    println!("username:     {}", profile.username);
    println!("email:        {}", profile.email);
    if !profile.role.is_empty() {
        println!("role:         {}", profile.role);
    }
    if let Some(company) = &profile.company {
        println!("company:      {}", company.company_name);
        if !company.inn.is_empty() {
            println!("inn:          {}", company.inn);
        }
        let roles = company.roles();
        if !roles.is_empty() {
            println!("activities:   {}", roles.join(", "));
        }
    }
    if let Some(claims) = Claims::decode(&tokens.access) {
        if let Some(at) = claims.expires_at() {
            let note = if claims.is_expired(chrono::Utc::now()) {
                " (expired)"
            } else {
                ""
            };
            println!("token until:  {}{}", at.format("%Y-%m-%d %H:%M UTC"), note);
        }
    }
    Ok(())
}

async fn run_profile(
    ctx: &AppContext,
    email: Option<String>,
    set: Vec<(String, String)>,
    logo: Option<PathBuf>,
) -> Result<()> {
    let update = ProfileUpdate {
        email,
        company: set
            .into_iter()
            .map(|(k, v)| {
                let value = match v.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::String(v),
                };
                (k, value)
            })
            .collect(),
    };
    let logo = match logo {
        Some(path) => Some(read_upload(&path).await?),
        None => None,
    };

    if !update.is_empty() || logo.is_some() {
        ctx.client().update_profile(&update, logo.as_ref()).await?;
        ctx.invalidate_profile();
        println!("Profile updated.");
    }

    let profile = ctx.profile().await?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "username": profile.username,
        "email": profile.email,
        "role": profile.role,
        "company": profile.company,
    }))?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "chemreg", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_or_minimal(&cli.config)?;
    let ctx = AppContext::new(cfg)?;

    match cli.command {
        Commands::Login { username, password } => {
            let password = read_password(password)?;
            ctx.login(&username, &password).await?;
            println!("Logged in as {}.", username);
        }
        Commands::Logout => {
            ctx.logout()?;
            println!("Logged out.");
        }
        Commands::Whoami => run_whoami(&ctx).await?,
        Commands::Register {
            username,
            email,
            password,
            company,
            inn,
            address,
            phone,
            manufacturer,
            importer,
            exporter,
        } => {
            let password = read_password(password)?;
            let registration = Registration {
                username: username.clone(),
                email,
                password,
                company: Company {
                    company_name: company,
                    inn,
                    address,
                    phone,
                    is_manufacturer: manufacturer,
                    is_importer: importer,
                    is_exporter: exporter,
                    logo: None,
                },
            };
            ctx.client().register(&registration).await?;
            println!("Registered {}. Log in with `chemreg login {}`.", username, username);
        }
        Commands::Profile { email, set, logo } => run_profile(&ctx, email, set, logo).await?,
        Commands::Search {
            text,
            filters,
            json,
        } => {
            search::run_search(&ctx, text.as_deref(), &filters, json).await?;
        }
        Commands::Facets { text, json } => {
            search::run_facets(&ctx, text.as_deref(), json).await?;
        }
        Commands::Suggest { text } => search::run_suggest(&ctx, &text).await?,
        Commands::Columns => search::run_columns(&ctx).await?,
        Commands::Get { id, flat, json } => get::run_get(&ctx, id, flat, json).await?,
        Commands::Save { file, id } => get::run_save(&ctx, &file, id).await?,
        Commands::Import { file, progress } => run_import(&ctx, &file, progress).await?,
        Commands::Template { out } => {
            let download = ctx.client().download_template().await?;
            let path = save_download(download, out, "registry_template.xlsx".to_string())?;
            println!("Saved {}", path.display());
        }
        Commands::Passport { id, out } => {
            let download = ctx.client().download_passport(id).await?;
            let path = save_download(download, out, format!("passport_{}.pdf", id))?;
            println!("Saved {}", path.display());
        }
        Commands::Attach {
            id,
            file,
            description,
            doc_type,
        } => {
            let upload = read_upload(&file).await?;
            let attachment = ctx
                .client()
                .upload_attachment(id, &upload, &description, doc_type)
                .await?;
            println!(
                "Attached {} as {} (attachment {})",
                upload.file_name,
                attachment.doc_type.as_str(),
                attachment.id
            );
        }
        Commands::Detach { id, attachment_id } => {
            ctx.client().delete_attachment(id, attachment_id).await?;
            println!("Removed attachment {} from element {}", attachment_id, id);
        }
        Commands::Structure { id, image } => {
            let upload = read_upload(&image).await?;
            ctx.client().upload_structure(id, &upload).await?;
            println!("Structure image uploaded for element {}", id);
        }
        Commands::Stats { json } => stats::run_stats(&ctx, json).await?,
        Commands::Support {
            subject,
            message,
            email,
            file,
        } => {
            let file = match file {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };
            ctx.client()
                .submit_ticket(&SupportTicket {
                    subject,
                    message,
                    contact_email: email,
                    file,
                })
                .await?;
            println!("Support ticket submitted.");
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
