//! # plinth-controller
//!
//! Reconciliation controller for Plinth configuration resources.
//!
//! - [`reconcile::Reconciler`]: one checksum-gated pass per trigger
//! - [`controller::Controller`]: watch loop, worker pool and resync
//! - [`units`]: the platform component catalog
//! - [`local::LocalRuntime`]: manifest file against the in-memory cluster
//! - [`settings`]: controller settings and their loader

pub mod controller;
pub mod local;
pub mod observability;
pub mod reconcile;
pub mod settings;
pub mod units;

pub use controller::{Controller, ControllerHandle, ControllerOptions, PassReport};
pub use local::{LocalError, LocalOptions, LocalRuntime, StateFile};
pub use reconcile::{PassOutcome, PassState, ReconcileError, Reconciler, Trigger};
pub use settings::{Settings, SettingsError};
