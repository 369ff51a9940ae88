pub mod channel;
pub mod codec;
pub mod dispatcher;
pub mod message;
pub mod peers;
pub mod registry;

pub use channel::*;
pub use codec::{read_frame, write_frame, FrameReader, FrameWriter};
pub use dispatcher::*;
pub use message::*;
pub use peers::*;
pub use registry::*;
