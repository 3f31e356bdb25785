//! Line-oriented chat loop.

use std::error::Error;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::AuthState;
use crate::core::conversation::SendOutcome;
use crate::core::jobs::{Job, JobState};
use crate::core::message::{Message, MessageKind};
use crate::core::orchestrator::OrchestratorCore;
use crate::core::sessions::{SessionId, SessionSummary};

pub const HELP_TEXT: &str = "\
Commands:
  /new              Start a new chat
  /chats            List saved chats
  /switch <n|id>    Switch to a chat by list number or id prefix
  /index <url>      Index a Drive folder and chat about it
  /folders          List recently indexed folders
  /open <job id>    Return to a recently indexed folder
  /status           Show sign-in, folder and chat status
  /login            Sign in with Google
  /logout           Sign out (chat history is kept)
  /help             Show this help
  /quit             Leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Message(String),
    New,
    Chats,
    Switch(String),
    Index(String),
    Folders,
    Open(String),
    Status,
    Login,
    Logout,
    Help,
    Quit,
    Empty,
    /// A slash command that is unknown or missing its argument.
    Invalid(String),
}

pub fn parse_input(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ReplCommand::Message(trimmed.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    let with_arg = |build: fn(String) -> ReplCommand| {
        if arg.is_empty() {
            ReplCommand::Invalid(format!("/{name} needs an argument"))
        } else {
            build(arg.to_string())
        }
    };

    match name {
        "new" => ReplCommand::New,
        "chats" => ReplCommand::Chats,
        "switch" => with_arg(ReplCommand::Switch),
        "index" => with_arg(ReplCommand::Index),
        "folders" => ReplCommand::Folders,
        "open" => with_arg(ReplCommand::Open),
        "status" => ReplCommand::Status,
        "login" => ReplCommand::Login,
        "logout" => ReplCommand::Logout,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("Unknown command: /{other}. Type /help.")),
    }
}

pub fn render_message(message: &Message) -> String {
    match message.kind {
        MessageKind::User => format!("You: {}", message.content),
        MessageKind::System => format!("ℹ️  {}", message.content),
        MessageKind::Bot => match message.sources_line() {
            Some(sources) => format!("{}\n  {}", message.content, sources),
            None => message.content.clone(),
        },
    }
}

/// Numbered rows for the chat list, marking the active one.
pub fn session_lines(summaries: &[SessionSummary], active: Option<&SessionId>) -> Vec<String> {
    summaries
        .iter()
        .enumerate()
        .map(|(index, summary)| {
            let marker = if Some(&summary.id) == active { "*" } else { " " };
            format!(
                "{marker}{:>3}. {}  {} ({} messages, {})",
                index + 1,
                summary.id.short(),
                summary.title,
                summary.message_count,
                summary.last_updated_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect()
}

fn folder_lines(folders: &[Job], active: Option<&str>) -> Vec<String> {
    folders
        .iter()
        .map(|job| {
            let marker = if Some(job.id.as_str()) == active { "*" } else { " " };
            format!(
                "{marker} {}  {} ({} files, {})",
                job.id,
                job.display_name,
                job.file_count,
                job.status.label()
            )
        })
        .collect()
}

/// Resolve a 1-based list number or a unique id prefix.
pub fn resolve_session(summaries: &[SessionSummary], arg: &str) -> Result<SessionId, String> {
    if let Ok(number) = arg.parse::<usize>() {
        if let Some(summary) = number.checked_sub(1).and_then(|i| summaries.get(i)) {
            return Ok(summary.id.clone());
        }
    }
    let matches: Vec<&SessionSummary> = summaries
        .iter()
        .filter(|summary| summary.id.as_str().starts_with(arg))
        .collect();
    match matches.as_slice() {
        [only] => Ok(only.id.clone()),
        [] => Err(format!("No chat matches '{arg}'")),
        _ => Err(format!("'{arg}' matches several chats; use more characters")),
    }
}

fn print_transcript(core: &OrchestratorCore) {
    if let Some(session) = core.sessions().active_session() {
        println!("── {} ──", session.display_title());
        for message in &session.messages {
            println!("{}\n", render_message(message));
        }
    }
}

fn print_status(core: &OrchestratorCore) {
    let snapshot = core.snapshot();
    match &snapshot.auth {
        AuthState::Authenticated(credential) => println!(
            "Signed in as {} <{}>",
            credential.profile.name, credential.profile.email
        ),
        other => println!("Auth: {}", other.label()),
    }
    match &snapshot.job {
        JobState::NoJob => println!("Folder: none"),
        JobState::Submitting { folder_reference } => {
            println!("Folder: indexing {folder_reference}")
        }
        JobState::Ready(job) => println!(
            "Folder: {} ({} files, {})",
            job.display_name,
            job.file_count,
            job.status.label()
        ),
    }
    match &snapshot.active_session {
        Some(session) => println!(
            "Chat: {} ({} messages, {:?})",
            session.display_title(),
            session.message_count,
            snapshot.conversation
        ),
        None => println!("Chat: none"),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Returns `false` when the loop should stop.
async fn handle(core: &OrchestratorCore, command: ReplCommand) -> bool {
    match command {
        ReplCommand::Empty => {}
        ReplCommand::Quit => return false,
        ReplCommand::Help => println!("{HELP_TEXT}"),
        ReplCommand::Invalid(message) => eprintln!("⚠️  {message}"),
        ReplCommand::Status => print_status(core),
        ReplCommand::Login => match core.login().await {
            Ok(credential) => println!("✅ Signed in as {}", credential.profile.email),
            Err(err) => eprintln!("❌ {err}"),
        },
        ReplCommand::Logout => {
            core.logout();
            println!("✅ Signed out. Your chats are still saved.");
        }
        ReplCommand::New => {
            core.new_chat();
            println!("Started a new chat.");
        }
        ReplCommand::Chats => {
            let summaries = core.sessions().summaries();
            if summaries.is_empty() {
                println!("No saved chats");
            }
            for line in session_lines(&summaries, core.sessions().active().as_ref()) {
                println!("{line}");
            }
        }
        ReplCommand::Switch(arg) => {
            let summaries = core.sessions().summaries();
            match resolve_session(&summaries, &arg)
                .and_then(|id| core.switch_chat(&id).map_err(|err| err.to_string()))
            {
                Ok(()) => print_transcript(core),
                Err(message) => eprintln!("❌ {message}"),
            }
        }
        ReplCommand::Index(url) => {
            println!("Indexing…");
            match core.submit_folder(&url).await {
                Ok(_) => print_transcript(core),
                Err(err) => eprintln!("❌ {err}"),
            }
        }
        ReplCommand::Folders => {
            let folders = core.recent_folders();
            if folders.is_empty() {
                println!("No folders indexed yet. Use /index <url>.");
            }
            let active = match core.snapshot().job {
                JobState::Ready(job) => Some(job.id),
                _ => None,
            };
            for line in folder_lines(&folders, active.as_deref()) {
                println!("{line}");
            }
        }
        ReplCommand::Open(job_id) => match core.open_job(&job_id) {
            Ok(_) => {
                if let Err(err) = core.refresh_job(&job_id).await {
                    tracing::debug!(error = %err, "could not refresh job status");
                }
                print_transcript(core);
            }
            Err(err) => eprintln!("❌ {err}"),
        },
        ReplCommand::Message(text) => match core.send(&text).await {
            Ok(SendOutcome::Answered(answer)) => println!("{}\n", render_message(&answer)),
            Ok(SendOutcome::Failed { notice, .. }) => eprintln!("{}\n", render_message(&notice)),
            Ok(SendOutcome::Discarded) => {}
            Err(err) => eprintln!("❌ {err}"),
        },
    }
    true
}

pub async fn run(core: &OrchestratorCore) -> Result<(), Box<dyn Error>> {
    match core.credential() {
        Some(credential) => println!("Signed in as {}.", credential.profile.email),
        None => println!("Not signed in. Type /login to sign in with Google."),
    }
    println!("Type /help for commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if !handle(core, parse_input(&line)).await {
            break;
        }
    }
    core.shutdown();
    Ok(())
}
