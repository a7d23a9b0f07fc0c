//! Company-name identity consolidation for the ESCP network portal.
//!
//! Survey submissions from 2021 through 2024 live in one table per year. An
//! administrator searches them by company name, picks the names that belong to
//! one firm, and consolidates them under a single login identity.

pub mod commands;
pub mod db;
pub mod error;
mod migrations;
pub mod relevance;
pub mod services;
pub mod state;
pub mod store;
pub mod supabase;
pub mod types;
pub mod util;
pub mod year_tables;
