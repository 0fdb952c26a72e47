//! # GL Engine
//!
//! General ledger posting and bank reconciliation for public-sector
//! accounting.
//!
//! ## Features
//!
//! - **Voucher posting**: balanced multi-line vouchers, posted at most once, reversed by mirror vouchers
//! - **Budget control**: per-period allocations checked and consumed in the same commit as the posting
//! - **System accounts**: clearing accounts resolved by role instead of hard-coded codes
//! - **Statement ingest**: CSV or keyed rows with per-row errors and running-balance checks
//! - **Reconciliation**: reference matching, operator group matches and the Bank Reconciliation Statement
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use gl_engine::{EngineConfig, Ledger, MemoryStorage};
//!
//! # async fn run() -> gl_engine::LedgerResult<()> {
//! let mut ledger = Ledger::open(MemoryStorage::new(), EngineConfig::default()).await?;
//! ledger.setup_standard_chart_of_accounts().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ledger;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use ledger::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
pub use utils::{init_tracing, MemoryStorage};
