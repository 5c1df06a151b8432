//! RIFF/WAVE chunk walking.
//!
//! Two entry points share the same rules: [`parse_wav`] works on a file
//! image already in memory (2D and 3D samples), [`read_wav_layout`] walks a
//! seekable reader without loading the payload (streams).

use crate::error::WavError;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

/// Integer PCM, the only encoding the engine plays
pub const WAVE_FORMAT_PCM: u16 = 1;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_CHUNK_LEN: usize = 16;

/// The 16 canonical bytes of a `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            format_tag: u16_at(bytes, 0),
            channels: u16_at(bytes, 2),
            sample_rate: u32_at(bytes, 4),
            byte_rate: u32_at(bytes, 8),
            block_align: u16_at(bytes, 12),
            bits_per_sample: u16_at(bytes, 14),
        }
    }

    /// Bytes in one frame (one sample for every channel), or `None` for
    /// a degenerate header.
    pub fn bytes_per_frame(&self) -> Option<usize> {
        let frame = (self.bits_per_sample as usize / 8) * self.channels as usize;
        (frame > 0).then_some(frame)
    }

    /// Accept only integer PCM with a non-empty frame layout.
    pub fn require_pcm(&self) -> Result<(), WavError> {
        if self.format_tag != WAVE_FORMAT_PCM {
            return Err(WavError::UnsupportedFormatTag { tag: self.format_tag });
        }
        if self.channels == 0 {
            return Err(WavError::ZeroChannels);
        }
        if self.bits_per_sample == 0 {
            return Err(WavError::ZeroBitsPerSample);
        }
        Ok(())
    }

    /// Byte rate recomputed from the layout; the header field is not trusted.
    pub fn frame_byte_rate(&self) -> u64 {
        self.bytes_per_frame().unwrap_or(0) as u64 * self.sample_rate as u64
    }

    pub fn describe(&self) -> String {
        format!(
            "{} Hz, {} channel(s), {}-bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// A parsed in-memory WAV image
#[derive(Debug, Clone, Copy)]
pub struct SoundInfo<'a> {
    pub format: WavFormat,
    /// Offset of the PCM payload inside the image
    pub data_offset: usize,
    pub data: &'a [u8],
}

impl SoundInfo<'_> {
    /// Number of frames in the payload, `None` when bits or channels is zero
    pub fn sample_count(&self) -> Option<u32> {
        self.format
            .bytes_per_frame()
            .map(|frame| (self.data.len() / frame) as u32)
    }

    pub fn duration_ms(&self) -> u32 {
        match (self.sample_count(), self.format.sample_rate) {
            (Some(samples), rate) if rate > 0 => ((samples as u64 * 1000) / rate as u64) as u32,
            _ => 0,
        }
    }
}

/// Position of the PCM payload inside a seekable file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavLayout {
    pub format: WavFormat,
    pub data_offset: u64,
    pub data_len: u64,
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn check_riff_header(header: &[u8]) -> Result<(), WavError> {
    if &header[0..4] != b"RIFF" {
        return Err(WavError::NotRiff);
    }
    if &header[8..12] != b"WAVE" {
        return Err(WavError::NotWave);
    }
    Ok(())
}

/// Chunks are word aligned: odd sizes carry one pad byte.
fn padded(size: u32) -> u64 {
    (size as u64 + 1) & !1
}

/// Walk a RIFF/WAVE image and locate its `fmt ` and `data` chunks.
pub fn parse_wav(bytes: &[u8]) -> Result<SoundInfo<'_>, WavError> {
    if bytes.len() < RIFF_HEADER_LEN {
        if bytes.len() >= 4 && &bytes[0..4] != b"RIFF" {
            return Err(WavError::NotRiff);
        }
        return Err(WavError::Truncated { what: "RIFF header" });
    }
    check_riff_header(&bytes[..RIFF_HEADER_LEN])?;

    let mut format = None;
    let mut data = None;
    let mut pos = RIFF_HEADER_LEN;

    while pos + CHUNK_HEADER_LEN <= bytes.len() && (format.is_none() || data.is_none()) {
        let id = &bytes[pos..pos + 4];
        let size = u32_at(bytes, pos + 4);
        let body = pos + CHUNK_HEADER_LEN;
        let body_end = body as u64 + size as u64;

        match id {
            b"fmt " => {
                if (size as usize) < FMT_CHUNK_LEN || body_end > bytes.len() as u64 {
                    return Err(WavError::Truncated { what: "fmt chunk" });
                }
                format = Some(WavFormat::from_bytes(&bytes[body..body + FMT_CHUNK_LEN]));
            }
            b"data" => {
                if body_end > bytes.len() as u64 {
                    return Err(WavError::Truncated { what: "data chunk" });
                }
                data = Some((body, size as usize));
            }
            _ if body_end > bytes.len() as u64 => break,
            _ => {}
        }

        let next = body as u64 + padded(size);
        if next > bytes.len() as u64 {
            break;
        }
        pos = next as usize;
    }

    let format = format.ok_or(WavError::MissingChunk { chunk: "fmt " })?;
    let (data_offset, data_len) = data.ok_or(WavError::MissingChunk { chunk: "data" })?;

    Ok(SoundInfo {
        format,
        data_offset,
        data: &bytes[data_offset..data_offset + data_len],
    })
}

fn read_exact_or<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<bool, WavError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            if what.is_empty() {
                Ok(false)
            } else {
                Err(WavError::Truncated { what })
            }
        }
        Err(err) => Err(WavError::Io(err)),
    }
}

/// Walk the chunk list of a seekable WAV file without reading its payload.
///
/// The reader is left positioned at the first PCM byte. A `data` chunk
/// that claims more bytes than the file holds is clamped to the file end.
pub fn read_wav_layout<R: Read + Seek>(reader: &mut R) -> Result<WavLayout, WavError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; RIFF_HEADER_LEN];
    read_exact_or(reader, &mut header, "RIFF header")?;
    check_riff_header(&header)?;

    let mut format = None;
    let mut data = None;
    let mut pos = RIFF_HEADER_LEN as u64;

    while format.is_none() || data.is_none() {
        let mut chunk = [0u8; CHUNK_HEADER_LEN];
        if !read_exact_or(reader, &mut chunk, "")? {
            break;
        }
        let size = u32_at(&chunk, 4);
        let body = pos + CHUNK_HEADER_LEN as u64;

        match &chunk[0..4] {
            b"fmt " => {
                if (size as usize) < FMT_CHUNK_LEN {
                    return Err(WavError::Truncated { what: "fmt chunk" });
                }
                let mut fmt = [0u8; FMT_CHUNK_LEN];
                read_exact_or(reader, &mut fmt, "fmt chunk")?;
                format = Some(WavFormat::from_bytes(&fmt));
            }
            b"data" => {
                let available = file_len.saturating_sub(body);
                data = Some((body, (size as u64).min(available)));
            }
            _ => {}
        }

        pos = body + padded(size);
        if pos > file_len {
            break;
        }
        reader.seek(SeekFrom::Start(pos))?;
    }

    let format = format.ok_or(WavError::MissingChunk { chunk: "fmt " })?;
    let (data_offset, data_len) = data.ok_or(WavError::MissingChunk { chunk: "data" })?;
    reader.seek(SeekFrom::Start(data_offset))?;

    Ok(WavLayout {
        format,
        data_offset,
        data_len,
    })
}

/// Build a canonical PCM WAV image around `pcm`.
pub fn encode_pcm_wav(channels: u16, sample_rate: u32, bits_per_sample: u16, pcm: &[u8]) -> Vec<u8> {
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;
    let mut out = Vec::with_capacity(44 + pcm.len() + 1);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + padded(pcm.len() as u32) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    out.extend_from_slice(pcm);
    if pcm.len() % 2 == 1 {
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = id.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn fmt_body(tag: u16, channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * (bits / 8);
        let mut body = Vec::new();
        body.extend_from_slice(&tag.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&rate.to_le_bytes());
        body.extend_from_slice(&(rate * align as u32).to_le_bytes());
        body.extend_from_slice(&align.to_le_bytes());
        body.extend_from_slice(&bits.to_le_bytes());
        body
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(4 + body.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_one_second_mono_16bit() {
        let pcm = vec![0u8; 22050 * 2];
        let image = encode_pcm_wav(1, 22050, 16, &pcm);

        let info = parse_wav(&image).unwrap();
        assert_eq!(info.format.channels, 1);
        assert_eq!(info.format.bits_per_sample, 16);
        assert_eq!(info.format.sample_rate, 22050);
        assert_eq!(info.sample_count(), Some(22050));
        assert_eq!(info.data.len(), 44100);
        assert_eq!(info.data_offset, 44);
        assert_eq!(info.duration_ms(), 1000);
    }

    #[test]
    fn test_skips_odd_sized_unknown_chunk() {
        let pcm: Vec<u8> = (0..8).collect();
        let image = riff(&[
            chunk(b"fmt ", &fmt_body(1, 2, 11025, 8)),
            chunk(b"LIST", b"INFOabc"),
            chunk(b"data", &pcm),
        ]);

        let info = parse_wav(&image).unwrap();
        assert_eq!(info.data, &pcm[..]);
        assert_eq!(info.sample_count(), Some(4));
        assert_eq!(info.format.channels, 2);
    }

    #[test]
    fn test_fmt_chunk_larger_than_canonical() {
        let mut body = fmt_body(1, 1, 8000, 8);
        body.extend_from_slice(&[0, 0]);
        let image = riff(&[chunk(b"fmt ", &body), chunk(b"data", &[1, 2, 3])]);

        let info = parse_wav(&image).unwrap();
        assert_eq!(info.format.sample_rate, 8000);
        assert_eq!(info.data, &[1, 2, 3]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut image = encode_pcm_wav(1, 22050, 16, &[0; 4]);
        image[0..4].copy_from_slice(b"RIFX");
        assert!(matches!(parse_wav(&image), Err(WavError::NotRiff)));

        let mut image = encode_pcm_wav(1, 22050, 16, &[0; 4]);
        image[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(parse_wav(&image), Err(WavError::NotWave)));
    }

    #[test]
    fn test_rejects_missing_chunks() {
        let image = riff(&[chunk(b"fmt ", &fmt_body(1, 1, 22050, 16))]);
        assert!(matches!(
            parse_wav(&image),
            Err(WavError::MissingChunk { chunk: "data" })
        ));

        let image = riff(&[chunk(b"data", &[0; 4])]);
        assert!(matches!(
            parse_wav(&image),
            Err(WavError::MissingChunk { chunk: "fmt " })
        ));
    }

    #[test]
    fn test_rejects_truncated_input() {
        assert!(matches!(parse_wav(b"RIFF"), Err(WavError::Truncated { .. })));
        assert!(matches!(parse_wav(b"OggS"), Err(WavError::NotRiff)));

        let mut image = encode_pcm_wav(1, 22050, 16, &[0; 16]);
        image.truncate(image.len() - 4);
        assert!(matches!(
            parse_wav(&image),
            Err(WavError::Truncated { what: "data chunk" })
        ));
    }

    #[test]
    fn test_degenerate_format_has_no_sample_count() {
        let image = riff(&[chunk(b"fmt ", &fmt_body(1, 0, 22050, 16)), chunk(b"data", &[0; 4])]);
        let info = parse_wav(&image).unwrap();
        assert_eq!(info.sample_count(), None);
        assert_eq!(info.duration_ms(), 0);
        assert!(matches!(info.format.require_pcm(), Err(WavError::ZeroChannels)));
    }

    #[test]
    fn test_require_pcm_rejects_adpcm() {
        let image = riff(&[chunk(b"fmt ", &fmt_body(2, 1, 22050, 4)), chunk(b"data", &[0; 4])]);
        let info = parse_wav(&image).unwrap();
        assert!(matches!(
            info.format.require_pcm(),
            Err(WavError::UnsupportedFormatTag { tag: 2 })
        ));
    }

    #[test]
    fn test_layout_from_reader() {
        let pcm: Vec<u8> = (0..100).collect();
        let image = riff(&[
            chunk(b"fmt ", &fmt_body(1, 1, 22050, 16)),
            chunk(b"LIST", &[9; 5]),
            chunk(b"data", &pcm),
        ]);
        let mut cursor = Cursor::new(image);

        let layout = read_wav_layout(&mut cursor).unwrap();
        assert_eq!(layout.data_len, 100);
        assert_eq!(layout.format.frame_byte_rate(), 44100);
        assert_eq!(cursor.position(), layout.data_offset);

        let mut first = [0u8; 3];
        cursor.read_exact(&mut first).unwrap();
        assert_eq!(first, [0, 1, 2]);
    }

    #[test]
    fn test_layout_clamps_overlong_data() {
        let mut image = encode_pcm_wav(1, 8000, 8, &[7; 10]);
        let data_size_at = image.len() - 10 - 4;
        image[data_size_at..data_size_at + 4].copy_from_slice(&1000u32.to_le_bytes());

        let layout = read_wav_layout(&mut Cursor::new(image)).unwrap();
        assert_eq!(layout.data_len, 10);
    }

    #[test]
    fn test_layout_rejects_missing_data() {
        let image = riff(&[chunk(b"fmt ", &fmt_body(1, 1, 22050, 16))]);
        assert!(matches!(
            read_wav_layout(&mut Cursor::new(image)),
            Err(WavError::MissingChunk { chunk: "data" })
        ));
    }
}
