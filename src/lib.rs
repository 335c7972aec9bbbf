//! # Mailseek
//!
//! An email sync and semantic retrieval engine with a grounded chat API.
//!
//! Mailseek connects to mail accounts (IMAP, or a built-in demo provider),
//! incrementally syncs new messages, embeds them into a SQLite-backed
//! vector index, and answers questions about your email through a chat
//! endpoint that cites the messages it drew from.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Connectors  │──▶│  Pipeline   │──▶│  SQLite  │
//! │ IMAP/Demo   │   │   Embed     │   │ VectorIdx│
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!       ▲                                  │
//!       │          ┌───────────────────────┤
//!  ┌──────────┐    ▼                       ▼
//!  │ Registry │  ┌──────────┐        ┌──────────┐
//!  │ (sync)   │  │   CLI    │        │   HTTP   │
//!  └──────────┘  │(mailseek)│        │  (axum)  │
//!                └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mailseek init                 # create database
//! mailseek serve                # start HTTP server
//! mailseek chat "when is the team offsite?"
//! mailseek stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and wire shapes |
//! | [`error`] | Engine error taxonomy |
//! | [`connector`] | Mail connector trait |
//! | [`connector_imap`] | IMAP (TLS) connector |
//! | [`connector_demo`] | In-memory demo connector |
//! | [`registry`] | Connector lifecycle and sync orchestration |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pipeline`] | Message-to-document embedding pipeline |
//! | [`index`] | SQLite vector index |
//! | [`chat`] | Retrieval and grounded chat |
//! | [`stats`] | Aggregated service statistics |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod config;
pub mod connector;
pub mod connector_demo;
pub mod connector_imap;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod stats;
