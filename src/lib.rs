//! # Grocery support
//!
//! The conversational support subsystem of a grocery delivery backend:
//! uploaded reference documents are indexed for semantic retrieval, and
//! customer chat messages are answered from canned intents, retrieved
//! document context, and live domain queries the model can call.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ extract ──▶ chunk ──▶ embed ──▶ VectorStore (SQLite)
//!                                                 │
//! chat ──▶ intent? ──yes──▶ canned reply          │
//!            │ no                                 ▼
//!            └──▶ retrieval ──▶ prompt ──▶ completion ◀──▶ functions
//!                                              │
//!                                              ▼
//!                                      reply or fallback
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | txt / docx / xlsx / pdf text extraction |
//! | [`chunk`] | Overlapping sentence-aware chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector storage and cosine search |
//! | [`ingest`] | Upload pipeline |
//! | [`retrieval`] | Local or remote context retrieval |
//! | [`functions`] | Function catalog and executor |
//! | [`completion`] | Two-round function-calling completion client |
//! | [`intent`] | Canned intent table |
//! | [`prompt`] | Prompt assembly |
//! | [`conversation`] | Reply resolution and fallback |
//! | [`history`] | Chat history loader |
//! | [`chat`] | Chat-send service |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod chat;
pub mod chunk;
pub mod commands;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod functions;
pub mod history;
pub mod ingest;
pub mod intent;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod server;
pub mod store;
