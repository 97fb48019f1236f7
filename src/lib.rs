//! # bulksync
//!
//! Change-data-capture bulk sync from periodic CSV snapshots into CouchDB.
//!
//! Each run loads a full snapshot into a local SQLite mirror, compares it
//! against what was last replicated, and pushes only the new, changed and
//! deleted records to the remote database in chunked `_bulk_docs` calls.
//! The mirror's cache is updated only for documents the remote confirmed,
//! so anything that failed is proposed again on the next run.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │ CSV file  │──▶│ staging      │──▶│ delta sets │──▶│ CouchDB  │
//! │ snapshot  │   │ (SQLite)     │   │ new/chg/del│   │ _bulk_docs│
//! └───────────┘   └──────┬───────┘   └─────┬──────┘   └────┬─────┘
//!                        │  compare        │               │ confirmed
//!                        ▼                 │               ▼
//!                 ┌──────────────┐         │        ┌────────────┐
//!                 │ cache        │◀────────┴────────│ cache write│
//!                 └──────────────┘                  └────────────┘
//! ```
//!
//! The runtime-agnostic engine lives in `bulksync-core`; this crate supplies
//! the SQLite mirror, the CSV source, the CouchDB client and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite mirror store |
//! | [`connector_csv`] | CSV snapshot source |
//! | [`couch`] | CouchDB bulk client |
//! | [`lock`] | Run lock |
//! | [`sync_cmd`] | The `sync` command |
//! | [`stats`] | The `stats` command |

pub mod config;
pub mod connector_csv;
pub mod couch;
pub mod db;
pub mod lock;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
pub mod sync_cmd;
