//! Core data models for the document library.
//!
//! `Document` maps to the `documents` table via `sqlx::FromRow` and
//! serializes as JSON via `serde`. `Identity` is the per-request caller.

pub mod document;
pub mod identity;
