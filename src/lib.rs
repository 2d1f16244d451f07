//! # SPHEREx Documentation Portal
//!
//! A web portal listing the SPHEREx Science Data Center (SSDC) documents by
//! series, with release, commit, issue, and approval status for each.
//!
//! A refresh pipeline gathers that metadata from the LTD documentation hub,
//! the metadata files published next to each build in S3, and GitHub. It
//! writes the merged result into a SQLite cache. The web tier renders
//! sortable tables from the cache without ever calling out to the network.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐   ┌──────────┐
//! │ LTD / S3 /   │──▶│   refresh   │──▶│  SQLite  │──▶│   HTTP   │
//! │ GitHub / YAML│   │  (worker)   │   │  cache   │   │  (axum)  │
//! └──────────────┘   └─────────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! portal init                          # create the cache
//! portal refresh --mode dataset        # load the YAML manifest
//! portal serve --with-worker           # web server + scheduled refresh
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and `PORTAL_*` overrides |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Series, documents, GitHub summaries |
//! | [`dataset`] | Static YAML manifest |
//! | [`ltd`] | LTD API client |
//! | [`s3`] | SigV4-signed bucket reads |
//! | [`lander`] | Published document metadata |
//! | [`github`] | GitHub REST client |
//! | [`store`] | Shared document cache |
//! | [`refresh`] | Aggregation pipeline |
//! | [`worker`] | Scheduled refresh loop |
//! | [`pages`] | HTML tables and sorting |
//! | [`server`] | HTTP routes |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod github;
pub mod lander;
pub mod logging;
pub mod ltd;
pub mod migrate;
pub mod models;
pub mod pages;
pub mod refresh;
pub mod s3;
pub mod server;
pub mod sources;
pub mod stats;
pub mod store;
pub mod worker;
