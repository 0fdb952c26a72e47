//! Ledger module containing accounts, budget control and voucher posting

pub mod account;
pub mod budget;
pub mod core;
pub mod posting;

pub use account::*;
pub use budget::*;
pub use self::core::*;
pub use posting::*;
