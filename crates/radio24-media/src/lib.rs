//! Media pipeline: PCM reframing, media-server rooms, realtime speech client.

pub mod pcm;
pub mod realtime;
pub mod relay;
pub mod room;

pub use pcm::{FRAME_BYTES, PcmError, PcmWriter};
pub use room::{AudioTrack, MediaConnector, MediaRoom};
