//! Transport collaborators
//!
//! The session layer never talks to the network directly. It joins rooms
//! through a [`RoomTransport`] and moves file bytes through a
//! [`FileTransferService`]. Both are traits so the real mesh can be swapped
//! for the in-process [`loopback`] implementations in tests and demos.
//!
//! Room traffic is split into three named channels:
//!
//! | channel   | payload                                   |
//! |-----------|-------------------------------------------|
//! | `msg`     | one live chat event                       |
//! | `user`    | presence announcement (display name)      |
//! | `history` | full history snapshot for a late joiner   |

pub mod files;
pub mod loopback;
pub mod room;

pub use files::{
    DownloadProgress, FileSource, FileTransferService, OutgoingFile, TransferError, TransferKey,
};
pub use room::{
    Channel, JoinedRoom, RoomError, RoomEvent, RoomHandle, RoomTransport, MAX_CHANNEL_NAME_LEN,
};
