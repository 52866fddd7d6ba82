//! keydesk Core - Shared types for key lending
//!
//! This crate provides the domain model shared between the chat adapters
//! and the daemon (keydeskd): identifiers, the fixed key inventory, the
//! lending ledger and the chat command parser.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod clock;
pub mod command;
pub mod error;
pub mod ids;
pub mod inventory;
pub mod ledger;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandKind, CommandParser};
pub use error::{DomainError, DomainResult};
pub use ids::{ChannelId, KeyId, UserId};
pub use inventory::KeyInventory;
pub use ledger::{KeyRecord, Ledger, LedgerError};
