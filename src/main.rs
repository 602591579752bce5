//! # Grocery support CLI (`gsupport`)
//!
//! ## Usage
//!
//! ```bash
//! gsupport --config ./config/gsupport.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gsupport init` | Create the SQLite database and run schema migrations |
//! | `gsupport upload <path>` | Extract, chunk, embed and store a document |
//! | `gsupport documents` | List uploaded documents |
//! | `gsupport delete <file-id>` | Delete a document and its chunks |
//! | `gsupport retrieve "<question>"` | Show the context retrieved for a question |
//! | `gsupport chat <chat-id> "<message>"` | Answer a chat message |
//! | `gsupport functions` | List the function catalog |
//! | `gsupport serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use grocery_support::app::Services;
use grocery_support::{commands, config, logging, migrate, server};

/// Document-grounded customer support for a grocery delivery backend.
#[derive(Parser)]
#[command(name = "gsupport", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gsupport.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Upload a .txt, .docx, .xlsx or .pdf document.
    Upload {
        path: PathBuf,

        /// Replace the chunks of an existing document instead of creating a new one.
        #[arg(long)]
        file_id: Option<String>,
    },

    /// List uploaded documents.
    Documents,

    /// Delete a document and its chunks.
    Delete { file_id: String },

    /// Retrieve document context for a question.
    Retrieve {
        question: String,

        /// Only search this document.
        #[arg(long)]
        file_id: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a chat message the way the chat endpoint would.
    Chat { chat_id: String, message: String },

    /// List the functions the model may call.
    Functions,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        command => {
            let services = Services::from_config(cfg).await?;
            match command {
                Commands::Upload { path, file_id } => {
                    commands::run_upload(&services, &path, file_id).await?
                }
                Commands::Documents => commands::run_documents(&services).await?,
                Commands::Delete { file_id } => commands::run_delete(&services, &file_id).await?,
                Commands::Retrieve {
                    question,
                    file_id,
                    top_k,
                } => {
                    commands::run_retrieve(&services, &question, file_id.as_deref(), top_k).await?
                }
                Commands::Chat { chat_id, message } => {
                    commands::run_chat(&services, &chat_id, &message).await?
                }
                Commands::Functions => commands::run_functions(&services)?,
                Commands::Init | Commands::Serve => {}
            }
            services.pool.close().await;
        }
    }

    Ok(())
}
