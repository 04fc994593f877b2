/// WAV decoding and output-device playback
pub mod playback;

pub use playback::{AudioPlayer, CpalPlayer, DecodedAudio, PlaybackError};
