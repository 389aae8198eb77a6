//! # itemhub-domain
//!
//! Pure domain model for the itemhub automation engine.
//!
//! ## Responsibilities
//! - Foundational types: error conventions, timestamps
//! - Define **Items** (typed state cells) and the **Item Store** with change detection
//! - Define **Cron schedules** and their matching rules
//! - Define **Conditions** (boolean trees over item state and wall-clock time)
//! - Define **Rules** (trigger → condition → actions)
//! - Contain all invariant enforcement and domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;

pub mod condition;
pub mod cron;
pub mod item;
pub mod rule;
