//! Deployment and test harness for the FundMe crowdfunding ledger.
//!
//! The crate is split along the pieces a FundMe deployment touches:
//!
//! * [`ledger`]: the contract's bookkeeping: funders, amounts, owner-only withdrawal.
//! * [`oracle`]: price feeds and the native-to-USD conversion the ledger relies on.
//! * [`chain`]: network identity and the chain id → price feed table.
//! * [`deploy`]: deploy scripts choosing between a mock feed and a live one.
//! * [`verify`]: post-deployment verification of creation code.
//! * [`account`]: ed25519 signers labelled with the address they control.
//! * [`devnet`]: an in-memory network the scripts and tests run against.

pub mod account;
pub mod chain;
pub mod deploy;
pub mod devnet;
pub mod ledger;
pub mod oracle;
pub mod verify;

pub use account::{NamedAccounts, Signer};
pub use chain::{ChainConfig, Network};
pub use devnet::DevChain;
pub use ledger::{FundingLedger, LedgerError};
