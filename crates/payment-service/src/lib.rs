//! Entitlement Payment Service
//!
//! Sells an access entitlement ("beta role") for cryptocurrency. Each
//! purchase gets its own one-time deposit address; the service watches the
//! chain for an incoming payment, waits for the configured confirmation
//! depth, grants the entitlement exactly once, and optionally sweeps the
//! received funds to an operator custody address.
//!
//! **Components:**
//! - `config`: Configuration management
//! - `chain`: Chain data provider client and normalizing observer
//! - `mock_chain`: Scripted in-process provider for development/testing
//! - `oracle`: Price oracle adapter
//! - `provisioner`: One-time deposit address provisioning
//! - `evaluator`: Creation-time price binding and sufficiency check
//! - `sweeper`: Custody sweep (build, sign locally, broadcast)
//! - `workflow`: Per-purchase state machine
//! - `registry`: Supervised task per purchase
//! - `storage`: Purchase and secret persistence (Redis or in-memory)
//! - `gateway`: Notification/entitlement gateway boundary
//! - `api`: REST API for creating and inspecting purchases
//!
//! **Purchase flow:**
//! 1. Buyer initiates a purchase → address provisioned, price bound
//! 2. Workflow polls the chain until a payment appears
//! 3. Confirmation depth reached + payment sufficient → entitlement granted
//! 4. Funds swept to custody (when enabled)

pub mod api;
pub mod chain;
pub mod config;
pub mod evaluator;
pub mod gateway;
pub mod mock_chain;
pub mod oracle;
pub mod provisioner;
pub mod registry;
pub mod storage;
pub mod sweeper;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use registry::WorkflowRegistry;
pub use workflow::{Purchase, PurchaseState, WorkflowDeps};
