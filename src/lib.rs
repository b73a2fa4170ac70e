//! # DocQuery
//!
//! Retrieval-augmented question answering over a user's uploaded PDF
//! documents.
//!
//! Users sign in with Google and receive a bearer token. Uploaded PDFs are
//! extracted, chunked, embedded and stored in a shared vector collection
//! tagged with the owner's id. Questions are embedded, matched against the
//! user's own chunks, reranked with a cross-encoder, and answered by Gemini
//! using the surviving chunks as context.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ extract ──▶ chunk ──▶ embed ──▶ ┌──────────────┐
//!                                             │ vector store │
//!  ask ──▶ embed ──▶ search (user filter) ◀── └──────────────┘
//!                         │
//!                         ▼
//!                      rerank ──▶ prompt ──▶ Gemini ──▶ answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF validation and text extraction |
//! | [`chunk`] | Sliding-window chunking and point ids |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Qdrant and in-memory vector stores |
//! | [`rerank`] | Cross-encoder reranking |
//! | [`generate`] | Prompt template and Gemini client |
//! | [`services`] | Model and store handles built at startup |
//! | [`ingest`] | Upload pipeline |
//! | [`retrieval`] | Question-answering pipeline |
//! | [`auth`] | Google OAuth, session tokens, bearer guard |
//! | [`users`] | User records |
//! | [`error`] | Pipeline errors and the HTTP error contract |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod services;
pub mod users;
pub mod vector_store;
