//! foldertalk is a terminal client for asking questions about the documents
//! in a Google Drive folder.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`auth`] signs the user in with Google and owns the credential.
//! - [`api`] defines the backend HTTP contract and its `reqwest` client.
//! - [`core`] holds indexing jobs, the bounded chat-session store with its
//!   debounced persistence, the conversation controller and the
//!   orchestrator that ties them together.
//! - [`cli`] parses arguments and runs one-shot commands or the chat REPL.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod utils;
