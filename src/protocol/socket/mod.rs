//! Robot-facing byte-stream sockets: framing, pose decoding, server, client.

pub mod client;
pub mod frame;
pub mod pose;
pub mod server;

pub use client::{with_newline, SocketClient, SocketClientHandle};
pub use frame::{is_structured, FrameReassembler, STRUCTURED_PREFIX};
pub use pose::{parse_poses, pose_label, PoseBlock, PoseField, PoseReport};
pub use server::{SocketServer, SocketServerHandle};
