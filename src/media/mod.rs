pub mod device;
pub mod file;

pub use device::{MediaConstraints, MediaDevices, MediaLease, MediaStream, TrackKind, VideoFrame};
pub use file::FileMedia;
