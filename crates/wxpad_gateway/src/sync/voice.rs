#![forbid(unsafe_code)]

use std::io::Cursor;

use anyhow::{Context, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use tracing::warn;

/// The gateway delivers SILK voice at this rate; decode and container
/// encoding both use it.
pub const VOICE_SAMPLE_RATE: u32 = 24000;

/// Both representations produced by one successful transcode.
#[derive(Debug, Clone)]
pub struct VoiceTranscode {
	/// WAV container (mono, 16-bit, 24 kHz), base64.
	pub wav_base64: String,
	/// Raw s16le samples, base64.
	pub pcm_base64: String,
}

/// Decode a SILK buffer to PCM and re-encode it as WAV.
pub fn transcode_silk_voice(silk: &[u8]) -> anyhow::Result<VoiceTranscode> {
	let pcm = silk_rs::decode_silk(silk.to_vec(), VOICE_SAMPLE_RATE as i32).map_err(|e| anyhow!("silk decode: {e}"))?;
	let wav = encode_wav_pcm16(&pcm, VOICE_SAMPLE_RATE)?;

	Ok(VoiceTranscode {
		wav_base64: BASE64_STANDARD.encode(&wav),
		pcm_base64: BASE64_STANDARD.encode(&pcm),
	})
}

/// Wrap raw s16le mono samples in a WAV container.
fn encode_wav_pcm16(pcm: &[u8], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
	let spec = hound::WavSpec {
		channels: 1,
		sample_rate,
		bits_per_sample: 16,
		sample_format: hound::SampleFormat::Int,
	};

	let mut cursor = Cursor::new(Vec::new());
	{
		let mut writer = hound::WavWriter::new(&mut cursor, spec).context("create wav writer")?;
		for sample in pcm.chunks_exact(2) {
			writer
				.write_sample(i16::from_le_bytes([sample[0], sample[1]]))
				.context("write wav sample")?;
		}
		writer.finalize().context("finalize wav")?;
	}

	Ok(cursor.into_inner())
}

/// Resolve the payload for a voice frame from its base64 codec buffer.
///
/// Returns `(msg_content, voice_pcm)`. On any decode/encode failure the
/// content falls back to the original buffer verbatim and no PCM is exposed.
pub fn voice_payload(buffer_b64: &str) -> (String, Option<String>) {
	let silk = match BASE64_STANDARD.decode(buffer_b64.trim()) {
		Ok(bytes) => bytes,
		Err(e) => {
			warn!(error = %e, "voice buffer is not valid base64; delivering original payload");
			metrics::counter!("wxpad_voice_transcode_fallback_total").increment(1);
			return (buffer_b64.to_string(), None);
		}
	};

	match transcode_silk_voice(&silk) {
		Ok(out) => {
			metrics::counter!("wxpad_voice_transcode_total").increment(1);
			(out.wav_base64, Some(out.pcm_base64))
		}
		Err(e) => {
			warn!(error = %e, "voice transcode failed; delivering original payload");
			metrics::counter!("wxpad_voice_transcode_fallback_total").increment(1);
			(buffer_b64.to_string(), None)
		}
	}
}
