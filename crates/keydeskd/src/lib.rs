//! keydesk Daemon - chat-driven key lending
//!
//! This crate wires the ledger to a chat platform:
//! - `config` - TOML file plus environment overrides
//! - `session` - connect / receive / reconnect lifecycle
//! - `dispatch` - applies parsed commands to the ledger
//! - `reply` - renders chat replies and notices
//! - `monitor` - periodic overdue scan
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        keydeskd                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  events  ┌─────────────────────────┐   │
//! │  │    ChatBus      │─────────▶│   SessionController     │   │
//! │  │ (Slack socket)  │◀─────────│ (parser + dispatch)     │   │
//! │  └─────────────────┘  posts   └────────────┬────────────┘   │
//! │           ▲                                │                │
//! │           │ notices                        │ Arc<Ledger>    │
//! │  ┌────────┴────────┐                       ▼                │
//! │  │ OverdueMonitor  │─────────────▶┌─────────────────┐       │
//! │  │ (hourly tick)   │  find_overdue│     Ledger      │       │
//! │  └─────────────────┘              │ (one mutex)     │       │
//! │                                   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Send failures are logged, never propagated

pub mod config;
pub mod dispatch;
pub mod monitor;
pub mod reply;
pub mod session;
