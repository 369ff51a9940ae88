pub mod ledger;
pub mod node;
pub mod receiver;
pub mod transfer;

#[cfg(test)]
pub(crate) mod fixture;

pub use ledger::Ledger;
pub use node::{connect, Branch, BranchHandle, BranchLinks, RunningBranch};
pub use receiver::run_receiver;
pub use transfer::{run_sender, TransferReceipt};
