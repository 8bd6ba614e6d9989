//! Domain model for the resolution engine.
//!
//! # Responsibility
//! - Define articles, append-only updates, candidates, resolutions and
//!   publications shared by every layer.
//!
//! # Invariants
//! - An `ArticleId`/slug pair is permanent once assigned.
//! - Candidates never become articles unless resolved as `NEW`.

pub mod article;
pub mod candidate;
pub mod publication;
pub mod resolution;
