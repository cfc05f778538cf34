//! Audio codecs
//!
//! 16-bit PCM conversion, the base64 wire form exchanged with the model,
//! and the resampling used by the capture path.

pub mod pcm;
pub mod resample;
pub mod wire;

pub use pcm::{decode_wire_chunk, encode_samples, float_frame_to_wire, float_to_pcm16};
pub use resample::{downmix_to_mono, resample_all, StreamResampler, RESAMPLER_CHUNK_FRAMES};
pub use wire::EncodedAudioChunk;
