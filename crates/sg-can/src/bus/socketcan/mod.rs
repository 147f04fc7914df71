//! SocketCAN frame adapter (Linux only)

mod adapter;

pub use adapter::SocketCanFrameIo;
