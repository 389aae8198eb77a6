//! # itemhub-adapter-virtual
//!
//! Virtual integration providing simulated devices and a notification sink
//! for testing and demonstration purposes.
//!
//! ## Provided actors
//!
//! | Actor | Default channel | Behaviour |
//! |-------|-----------------|-----------|
//! | [`VirtualActor`] | `virtual` | Reports configured device states to wired items; commands update the device (`turn_on` / `turn_off` / `toggle` or a literal state) |
//! | [`VirtualNotifier`] | `notify` | Logs notifications and keeps a bounded history |
//!
//! ## Dependency rule
//!
//! Depends on `itemhub-app` (port traits) and `itemhub-domain` only.

mod actor;
mod config;
mod devices;
mod error;
mod notify;

pub use actor::VirtualActor;
pub use config::{NotifyConfig, VirtualConfig};
pub use error::VirtualError;
pub use notify::{Notification, VirtualNotifier};
