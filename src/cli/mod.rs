//! Command-line interface parsing and handling
//!
//! One-shot commands run against the same [`OrchestratorCore`] the
//! interactive REPL uses.

pub mod repl;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::api::{Backend, HttpBackend};
use crate::auth::google::GoogleIdentity;
use crate::auth::{AuthGate, IdentityProvider, KeyringCredentialStore, UnconfiguredIdentity};
use crate::core::config::data::path_display;
use crate::core::config::{resolve_data_dir, Config, Settings};
use crate::core::orchestrator::OrchestratorCore;
use crate::core::sessions::{ChatSessionStore, FileSessionRepository, SessionLimits};
use crate::utils::logging;
use crate::utils::url::normalize_base_url;

#[derive(Parser)]
#[command(name = "foldertalk")]
#[command(about = "Chat with the documents in a Google Drive folder")]
#[command(
    long_about = "foldertalk signs you in with Google, asks the backend to index a Drive \
folder and lets you ask questions about its documents. Answers cite the files they \
came from. Conversations are kept locally, one per indexed folder.\n\n\
Environment Variables:\n\
  FOLDERTALK_BACKEND_URL           Backend base URL (default http://localhost:8000)\n\
  FOLDERTALK_GOOGLE_CLIENT_ID      OAuth client id for Google sign-in\n\
  FOLDERTALK_GOOGLE_CLIENT_SECRET  OAuth client secret\n\
  FOLDERTALK_LOG                   Log filter, e.g. foldertalk=debug\n\n\
Chat commands:\n\
  /help             List all chat commands\n\
  /index <url>      Index a Drive folder and start chatting about it\n\
  /quit             Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Write diagnostics to this file instead of stderr
    #[arg(short = 'l', long, global = true)]
    pub log: Option<PathBuf>,

    /// Do not read or store the credential in the system keyring
    #[arg(long, global = true)]
    pub no_keyring: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with Google
    Login,
    /// Sign out and forget the stored credential
    Logout,
    /// Show who is signed in
    Whoami,
    /// Index a Google Drive folder
    Index {
        /// Folder URL or id
        url: String,
    },
    /// List saved chat sessions
    Chats,
    /// Start the interactive chat (default)
    Chat,
    /// Show the configuration file and effective settings
    Config,
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {message}");
    std::process::exit(1);
}

/// Wire the production collaborators together.
pub fn build_core(settings: &Settings, use_keyring: bool) -> Result<OrchestratorCore, Box<dyn Error>> {
    let client = reqwest::Client::builder().build()?;
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(
        client.clone(),
        normalize_base_url(&settings.backend_url),
    ));
    let identity: Arc<dyn IdentityProvider> = match &settings.google_client_id {
        Some(client_id) => Arc::new(GoogleIdentity::new(
            client,
            client_id.clone(),
            settings.google_client_secret.clone(),
        )),
        None => Arc::new(UnconfiguredIdentity),
    };

    let data_dir = resolve_data_dir(settings.data_dir.as_deref())?;
    let repository = Arc::new(FileSessionRepository::in_data_dir(&data_dir));
    let sessions = Arc::new(ChatSessionStore::open(
        repository,
        SessionLimits::from(settings),
    ));

    let auth = AuthGate::new(
        identity,
        Arc::clone(&backend),
        Arc::new(KeyringCredentialStore::new_with_keyring(use_keyring)),
        settings.identity_ready_timeout,
    );
    Ok(OrchestratorCore::new(
        auth,
        backend,
        sessions,
        settings.recent_folder_capacity,
    ))
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.log.as_deref())?;

    let command = args.command.unwrap_or(Commands::Chat);
    match &command {
        Commands::Config => {
            let config = Config::load()?;
            println!("Config file: {}", path_display(Config::get_config_path()?));
            config.print_all();
            println!();
            config.settings().print_effective();
            return Ok(());
        }
        Commands::Set { key, value } => {
            let mut config = Config::load()?;
            match config.set_value(key, &value.join(" ")) {
                Ok(confirmation) => {
                    config.save()?;
                    println!("{confirmation}");
                }
                Err(message) => fail(message),
            }
            return Ok(());
        }
        Commands::Unset { key } => {
            let mut config = Config::load()?;
            match config.unset_value(key) {
                Ok(confirmation) => {
                    config.save()?;
                    println!("{confirmation}");
                }
                Err(message) => fail(message),
            }
            return Ok(());
        }
        _ => {}
    }

    let settings = Config::load()?.settings();
    let core = build_core(&settings, !args.no_keyring)?;
    core.restore();

    match command {
        Commands::Login => match core.login().await {
            Ok(credential) => println!(
                "✅ Signed in as {} <{}>",
                credential.profile.name, credential.profile.email
            ),
            Err(err) => fail(err),
        },
        Commands::Logout => {
            core.logout();
            println!("✅ Signed out");
        }
        Commands::Whoami => match core.credential() {
            Some(credential) => {
                println!("{} <{}>", credential.profile.name, credential.profile.email)
            }
            None => println!("Not signed in"),
        },
        Commands::Index { url } => {
            let result = core.submit_folder(&url).await;
            core.shutdown();
            match result {
                Ok(job) => println!(
                    "✅ Indexed {} ({} files, job {})",
                    job.display_name, job.file_count, job.id
                ),
                Err(err) => fail(err),
            }
        }
        Commands::Chats => {
            let summaries = core.sessions().summaries();
            if summaries.is_empty() {
                println!("No saved chats");
            }
            for line in repl::session_lines(&summaries, None) {
                println!("{line}");
            }
        }
        Commands::Chat => repl::run(&core).await?,
        Commands::Config | Commands::Set { .. } | Commands::Unset { .. } => {}
    }
    Ok(())
}
