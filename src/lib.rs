//! # chemreg
//!
//! Client for a chemical-substance registry: hazardous-substance passports,
//! a public faceted search, and Excel bulk import with asynchronous task
//! polling.
//!
//! All business rules live on the server. This crate holds the client-side
//! state machines that drive it, plus a typed HTTP client and the `chemreg`
//! command-line front end.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ QueryComposer│──▶│ SearchSession│──▶│                │
//! │ text+filters │   │ rows+facets  │   │ RegistryClient │──▶ registry API
//! └──────────────┘   └──────────────┘   │  (reqwest)     │
//! ┌──────────────┐                      │                │
//! │ ImportPoller │─────────────────────▶│                │
//! │ upload+poll  │                      └────────────────┘
//! └──────────────┘
//!        │ watch channels
//!        ▼
//!   CLI (chemreg) or any other view
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chemreg login operator
//! chemreg search acetone --filter hazard_class=3
//! chemreg get 42 --flat
//! chemreg import substances.xlsx
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | API error taxonomy and field-level validation errors |
//! | [`models`] | Wire types for every endpoint |
//! | [`session`] | Token store and the application context |
//! | [`client`] | Typed HTTP client |
//! | [`traits`] | Seams between the state machines and the client |
//! | [`import`] | Import task poller |
//! | [`debounce`] | Single-slot debounce timer |
//! | [`query`] | Search/facet query composer and search session |
//! | [`record`] | Substance records: sections, flat view, write payload |
//! | [`progress`] | Import progress reporting |
//! | [`stats`] | Registry statistics |
//! | [`search`] | `chemreg search`, `facets`, `suggest`, `columns` |
//! | [`get`] | `chemreg get` and `save` |

pub mod client;
pub mod config;
pub mod debounce;
pub mod error;
pub mod get;
pub mod import;
pub mod models;
pub mod progress;
pub mod query;
pub mod record;
pub mod search;
pub mod session;
pub mod stats;
pub mod traits;
