pub mod coordinator;
pub mod report;
pub mod state;

pub use coordinator::*;
pub use report::*;
pub use state::*;
