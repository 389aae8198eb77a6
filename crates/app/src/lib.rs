//! # itemhub-app
//!
//! Application layer — the hub runtime and the **port definitions** (traits)
//! adapters implement.
//!
//! ## Responsibilities
//! - Define **port traits** adapters must implement:
//!   - `Actor` — device connector (input polling, outbound commands)
//!   - `SnapshotStore` — persist and reload item values
//! - Provide the **runtime**:
//!   - `Context` — owns the item store, publishes item events, routes
//!     item commands to the outbound queue
//!   - `RuleEngine` — evaluates triggers and conditions, runs actions
//!   - `CommandPump` — delivers queued commands to actors
//! - Provide **in-process infrastructure** (event bus, templates) that
//!   doesn't need IO
//!
//! ## Dependency rule
//! Depends on `itemhub-domain` only (plus `tokio` for channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod command_pump;
pub mod context;
pub mod event_bus;
pub mod ports;
pub mod rule_engine;
pub mod template;
