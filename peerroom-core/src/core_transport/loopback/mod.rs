//! In-process transports
//!
//! [`LoopbackNetwork`] connects any number of [`LoopbackTransport`]s living in
//! the same process, and [`LoopbackFileTransfer`] is a shared blob store that
//! hands out magnet-style descriptors. Used by the test suite and the CLI
//! demo; nothing here touches a socket.

pub mod files;
pub mod room;

pub use files::LoopbackFileTransfer;
pub use room::{LoopbackNetwork, LoopbackTransport};
