//! Audio file decoding

use std::path::Path;
use std::sync::Arc;

use autodj_audio::{DecodedAudio, SourceLoader};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Errors that can occur while decoding a track
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No audio track found in file")]
    NoAudioTrack,
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("File contains no audio frames")]
    Empty,
}

/// A decoded track, interleaved stereo
#[derive(Debug, Clone)]
pub struct LoadedTrack {
    /// Interleaved stereo samples (f32, normalized to -1.0 to 1.0)
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Rate of the file before resampling
    pub source_sample_rate: u32,
    pub duration_secs: f64,
}

/// Open a file and probe its container
pub(crate) fn probe(path: &Path) -> Result<Box<dyn FormatReader>, LoadError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LoadError::Decode(e.to_string()))?;
    Ok(probed.format)
}

/// Audio file loader using Symphonia, resampling with Rubato
#[derive(Debug, Clone, Copy)]
pub struct TrackLoader {
    target_sample_rate: u32,
}

impl Default for TrackLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackLoader {
    /// Loader producing 48kHz audio
    pub fn new() -> Self {
        Self::with_sample_rate(48000)
    }

    pub fn with_sample_rate(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode a file at the loader's target rate
    pub fn decode(&self, path: &Path) -> Result<LoadedTrack, LoadError> {
        decode_at(path, self.target_sample_rate)
    }
}

impl SourceLoader for TrackLoader {
    type Error = LoadError;

    fn load(&self, locator: &str, sample_rate: u32) -> Result<DecodedAudio, LoadError> {
        let track = decode_at(Path::new(locator), sample_rate)?;
        tracing::debug!(locator, secs = track.duration_secs, "track decoded");
        Ok(DecodedAudio {
            samples: Arc::new(track.samples),
            sample_rate: track.sample_rate,
        })
    }
}

fn decode_at(path: &Path, target_rate: u32) -> Result<LoadedTrack, LoadError> {
    let mut format = probe(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(LoadError::NoAudioTrack)?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| LoadError::Decode(e.to_string()))?;

    let mut stereo: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "stopping at unreadable packet");
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(LoadError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        push_stereo(&mut stereo, sample_buf.samples(), channels);
    }

    if stereo.is_empty() {
        return Err(LoadError::Empty);
    }

    let duration_secs = (stereo.len() / 2) as f64 / f64::from(source_rate);
    let samples = if source_rate != target_rate {
        resample(&stereo, source_rate, target_rate)?
    } else {
        stereo
    };

    Ok(LoadedTrack {
        samples,
        sample_rate: target_rate,
        source_sample_rate: source_rate,
        duration_secs,
    })
}

/// Append interleaved frames as stereo: mono is duplicated, extra channels dropped
fn push_stereo(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    match channels {
        1 => out.extend(interleaved.iter().flat_map(|&s| [s, s])),
        2 => out.extend_from_slice(interleaved),
        n => {
            for frame in interleaved.chunks_exact(n) {
                out.extend_from_slice(&frame[..2]);
            }
        }
    }
}

/// Resample interleaved stereo between rates
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, LoadError> {
    use rubato::{FftFixedInOut, Resampler};

    const CHANNELS: usize = 2;
    let frames = samples.len() / CHANNELS;

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, CHANNELS)
            .map_err(|e| LoadError::Resample(e.to_string()))?;

    let deinterleaved: Vec<Vec<f32>> = (0..CHANNELS)
        .map(|ch| (0..frames).map(|f| samples[f * CHANNELS + ch]).collect())
        .collect();

    let chunk_size = resampler.input_frames_next();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); CHANNELS];

    let mut pos = 0;
    while pos + chunk_size <= frames {
        let input_refs: Vec<&[f32]> = deinterleaved
            .iter()
            .map(|ch| &ch[pos..pos + chunk_size])
            .collect();

        let resampled = resampler
            .process(&input_refs, None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(data);
        }
        pos += chunk_size;
    }

    // Zero-pad the tail and keep only its share of the output
    if pos < frames {
        let remaining = frames - pos;
        let padded: Vec<Vec<f32>> = deinterleaved
            .iter()
            .map(|ch| {
                let mut v = ch[pos..].to_vec();
                v.resize(chunk_size, 0.0);
                v
            })
            .collect();
        let input_refs: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();

        let resampled = resampler
            .process(&input_refs, None)
            .map_err(|e| LoadError::Resample(e.to_string()))?;
        let keep = remaining * target_rate as usize / source_rate as usize;
        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(&data[..keep.min(data.len())]);
        }
    }

    let output_frames = output[0].len().min(output[1].len());
    let mut interleaved = Vec::with_capacity(output_frames * CHANNELS);
    for frame in 0..output_frames {
        interleaved.push(output[0][frame]);
        interleaved.push(output[1][frame]);
    }
    Ok(interleaved)
}
