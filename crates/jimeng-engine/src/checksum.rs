/// Assumed bitrate for compressed audio when no header can be parsed.
const FALLBACK_BYTES_PER_SECOND: f64 = 128.0 * 1000.0 / 8.0;
const WAV_HEADER_LEN: usize = 44;
const WAV_BYTE_RATE_OFFSET: usize = 28;

/// CRC-32 (IEEE, reflected 0xEDB88320) as eight lowercase hex chars.
pub fn crc32_hex(bytes: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(bytes))
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    let chunk = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= WAV_HEADER_LEN && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn wav_duration_ms(bytes: &[u8], byte_rate: u32) -> Option<u64> {
    let rate = f64::from(byte_rate);
    let mut offset = 12usize;
    while offset + 8 < bytes.len() {
        let chunk_id = bytes.get(offset..offset + 4)?;
        let chunk_size = read_u32_le(bytes, offset + 4)?;
        if chunk_id == b"data" {
            return Some((f64::from(chunk_size) / rate * 1000.0).round() as u64);
        }
        offset = offset.checked_add(8 + chunk_size as usize)?;
    }
    let remaining = bytes.len().saturating_sub(WAV_HEADER_LEN) as f64;
    Some((remaining / rate * 1000.0).round() as u64)
}

/// Duration of an audio buffer in milliseconds.
///
/// WAV buffers are measured from their `data` chunk; anything else is
/// estimated at 128 kbps. Returns 0 when the buffer cannot be measured.
pub fn audio_duration_ms(bytes: &[u8]) -> u64 {
    if is_wav(bytes) {
        if let Some(byte_rate) = read_u32_le(bytes, WAV_BYTE_RATE_OFFSET).filter(|rate| *rate > 0) {
            return wav_duration_ms(bytes, byte_rate).unwrap_or(0);
        }
    }
    (bytes.len() as f64 / FALLBACK_BYTES_PER_SECOND * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(byte_rate: u32, data_len: usize, extra_chunk: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&44_100u32.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        if let Some(chunk) = extra_chunk {
            out.extend_from_slice(b"LIST");
            out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            out.extend_from_slice(chunk);
        }
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data_len as u32).to_le_bytes());
        out.extend(std::iter::repeat(0u8).take(data_len));
        out
    }

    #[test]
    fn crc32_matches_reference_vectors() {
        assert_eq!(crc32_hex(b""), "00000000");
        assert_eq!(crc32_hex(b"123456789"), "cbf43926");
        assert_eq!(crc32_hex(b"The quick brown fox jumps over the lazy dog"), "414fa339");
    }

    #[test]
    fn wav_duration_comes_from_data_chunk() {
        let buffer = wav(176_400, 17_640, None);
        assert_eq!(buffer.len(), 44 + 17_640);
        assert_eq!(audio_duration_ms(&buffer), 100);
    }

    #[test]
    fn wav_scan_skips_unrelated_chunks() {
        let buffer = wav(176_400, 176_400, Some(b"INFOtest"));
        assert_eq!(audio_duration_ms(&buffer), 1000);
    }

    #[test]
    fn wav_without_data_chunk_uses_file_size() {
        let mut buffer = wav(1_000, 0, None);
        buffer.truncate(36);
        buffer.extend_from_slice(b"junk");
        buffer.extend_from_slice(&u32::MAX.to_le_bytes());
        buffer.extend(std::iter::repeat(0u8).take(500));
        assert_eq!(audio_duration_ms(&buffer), 500);
    }

    #[test]
    fn non_wav_is_estimated_at_128_kbps() {
        assert_eq!(audio_duration_ms(&vec![0u8; 16_000]), 1000);
        assert_eq!(audio_duration_ms(b"ID3"), 0);
        assert_eq!(audio_duration_ms(&[]), 0);
    }
}
