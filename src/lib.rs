//! # Context Intelligence
//!
//! Cross-document intelligence for retrieval-augmented AI tools.
//!
//! Given documents that a search already returned, the engine reasons about
//! how they relate: pairwise similarity across six metrics, clustering with
//! several strategies, a citation network with authority and connectivity
//! rankings, and contradiction detection with an optional, budgeted
//! language-model validation phase.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────────────┐
//! │ Retriever  │──▶│ ToolRegistry │──▶│ similarity ─▶ cluster    │
//! │ (corpus)   │   │  7 tools     │   │ citation    conflict ─┐  │
//! └────────────┘   └──────┬───────┘   └───────────────────────┼──┘
//!                         │                                   ▼
//!                  ┌──────┴──────┐                     ┌────────────┐
//!                  │ HTTP + MCP  │                     │ validator  │
//!                  │   (ctxi)    │                     │ (LLM)      │
//!                  └─────────────┘                     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctxi corpus                                  # check the loaded documents
//! ctxi call detect_conflicts --param query=token
//! ctxi serve mcp                               # start HTTP + MCP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, tags, references, hierarchy |
//! | [`similarity`] | Multi-metric similarity and complementary content |
//! | [`cluster`] | Clustering strategies, naming, coherence |
//! | [`citation`] | Citation network and rankings |
//! | [`conflict`] | Lexical contradiction detection and budgeted validation |
//! | [`validation`] | Conflict validators (OpenAI, Ollama) |
//! | [`nlp`] | Text similarity backends (lexical, embedding) |
//! | [`embedding`] | Embedding providers |
//! | [`retrieval`] | Retriever trait and JSON corpus retriever |
//! | [`cache`] | Expansion cache for paging through earlier results |
//! | [`tools`] | Tool trait, context, registry, built-in tools |
//! | [`server`] | HTTP server |
//! | [`mcp`] | MCP bridge |
//! | [`config`] | TOML configuration |

pub mod cache;
pub mod citation;
pub mod cluster;
pub mod config;
pub mod conflict;
pub mod embedding;
pub mod error;
pub mod http;
pub mod mcp;
pub mod models;
pub mod nlp;
pub mod retrieval;
pub mod server;
pub mod similarity;
pub mod tools;
pub mod validation;
