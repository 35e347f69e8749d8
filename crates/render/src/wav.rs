use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use duplex_transport::{SampleFormat, StorageError, TrackStorage};

type Writer = hound::WavWriter<BufWriter<File>>;

fn storage_error(err: hound::Error) -> StorageError {
    match err {
        hound::Error::IoError(e) => StorageError::Io(e),
        other => StorageError::Encode(other.to_string()),
    }
}

/// Mono capture track streamed straight into a WAV file.
///
/// The header is rewritten on every [`TrackStorage::flush`], so a crash
/// after a flush leaves a readable file. The track offset and dropout marks
/// are kept in memory; the file itself always starts at its first sample.
pub struct WavTrack {
    path: PathBuf,
    name: String,
    rate: u32,
    format: SampleFormat,
    writer: Option<Writer>,
    frames: u64,
    offset: f64,
    dropouts: Vec<(f64, f64)>,
}

impl WavTrack {
    pub fn create(path: impl AsRef<Path>, rate: u32, format: SampleFormat) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: format.bits(),
            sample_format: if format.is_float() {
                hound::SampleFormat::Float
            } else {
                hound::SampleFormat::Int
            },
        };
        let writer = hound::WavWriter::create(&path, spec).map_err(storage_error)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());

        Ok(Self {
            path,
            name,
            rate,
            format,
            writer: Some(writer),
            frames: 0,
            offset: 0.0,
            dropouts: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dropouts(&self) -> &[(f64, f64)] {
        &self.dropouts
    }

    /// Write the final header and close the file.
    pub fn finalize(mut self) -> Result<PathBuf, StorageError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(storage_error)?;
        }
        Ok(self.path.clone())
    }

    fn write_all(writer: &mut Writer, format: SampleFormat, samples: &[f32]) -> Result<(), hound::Error> {
        match format {
            SampleFormat::Int16 => {
                for &sample in samples {
                    writer.write_sample(format.to_int(sample) as i16)?;
                }
            }
            SampleFormat::Int24 => {
                for &sample in samples {
                    writer.write_sample(format.to_int(sample))?;
                }
            }
            SampleFormat::Float32 => {
                for &sample in samples {
                    writer.write_sample(sample)?;
                }
            }
        }
        Ok(())
    }
}

impl TrackStorage for WavTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_format(&self) -> SampleFormat {
        self.format
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn append(&mut self, samples: &[f32]) -> Result<(), StorageError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(StorageError::Encode(format!("{} is already finalized", self.name)));
        };
        Self::write_all(writer, self.format, samples).map_err(storage_error)?;
        self.frames += samples.len() as u64;
        Ok(())
    }

    fn flush(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(err) = writer.flush() {
            log::warn!("failed to flush {}: {err}", self.path.display());
        }
    }

    fn frames(&self) -> u64 {
        self.frames
    }

    fn offset(&self) -> f64 {
        self.offset
    }

    fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    fn mark_dropout(&mut self, start: f64, duration: f64) {
        self.dropouts.push((start, duration));
    }
}
