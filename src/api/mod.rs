//! In-process message surface
//!
//! The core is embedded, not served over a wire: UI and page callers hand
//! `WalletMsg` values to the router and get JSON values back. Field names
//! and the error taxonomy are the compatibility contract.

pub mod msgs;
pub mod router;

pub use msgs::WalletMsg;
pub use router::MsgRouter;
