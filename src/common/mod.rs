pub mod backoff;
pub mod error;
pub mod telemetry;
pub mod time;

pub use backoff::*;
pub use error::*;
pub use time::*;
