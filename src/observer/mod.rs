pub mod correlator;
pub mod server;

pub use correlator::{Correlator, SnapshotSummary, TransferLine};
pub use server::{Observer, ObserverEvent};
