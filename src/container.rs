use std::io::{Read, Seek, SeekFrom};

use crate::error::{NcmError, Result};

/// Fixed file signature of the ncm container.
const MAGIC: [u8; 8] = *b"CTENFDAM";

/// Parsed container header. The reader it was parsed from is left
/// positioned at the first byte of the encrypted audio payload.
#[derive(Debug)]
pub struct Container {
    /// Obfuscated, AES-wrapped per-file key.
    pub key_blob: Vec<u8>,
    /// Obfuscated metadata blob; empty when the encoder wrote none.
    pub meta_blob: Vec<u8>,
    /// Offset of the first audio payload byte, for re-seeking.
    pub audio_start: u64,
}

impl Container {
    /// Reads the fixed header layout: signature, 2-byte gap, key blob,
    /// metadata blob, 4-byte checksum (never validated), 5 reserved
    /// bytes, then the embedded image, which is skipped rather than
    /// kept. Fails before any cryptographic work if the signature does
    /// not match.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Container> {
        let mut magic = [0u8; 8];
        read_field(reader, &mut magic, "signature")?;
        if magic != MAGIC {
            return Err(NcmError::InvalidFormat);
        }

        reader.seek(SeekFrom::Current(2))?;

        let key_len = read_u32_le(reader, "key length")?;
        let mut key_blob = vec![0u8; key_len as usize];
        read_field(reader, &mut key_blob, "key blob")?;

        let meta_len = read_u32_le(reader, "metadata length")?;
        let mut meta_blob = vec![0u8; meta_len as usize];
        read_field(reader, &mut meta_blob, "metadata blob")?;

        // Checksum plus reserved bytes; the format defines no validated
        // checksum at this layer.
        let mut skipped = [0u8; 9];
        read_field(reader, &mut skipped, "checksum and reserved bytes")?;

        let image_len = read_u32_le(reader, "image length")?;
        reader.seek(SeekFrom::Current(i64::from(image_len)))?;

        let audio_start = reader.stream_position()?;

        Ok(Container {
            key_blob,
            meta_blob,
            audio_start,
        })
    }
}

fn read_field<R: Read>(reader: &mut R, buf: &mut [u8], field: &'static str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => NcmError::TruncatedContainer(field),
        _ => NcmError::Io(e),
    })
}

fn read_u32_le<R: Read>(reader: &mut R, field: &'static str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_field(reader, &mut buf, field)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_header(key: &[u8], meta: &[u8], image: &[u8], audio: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        out.extend_from_slice(meta);
        out.extend_from_slice(&[0u8; 9]);
        out.extend_from_slice(&(image.len() as u32).to_le_bytes());
        out.extend_from_slice(image);
        out.extend_from_slice(audio);
        out
    }

    #[test]
    fn parses_fields_and_records_audio_offset() {
        let bytes = build_header(b"keyblob", b"metablob", b"img", b"AUDIO");
        let mut cursor = Cursor::new(&bytes);
        let container = Container::parse(&mut cursor).unwrap();

        assert_eq!(container.key_blob, b"keyblob");
        assert_eq!(container.meta_blob, b"metablob");
        assert_eq!(container.audio_start as usize, bytes.len() - 5);
        assert_eq!(cursor.position(), container.audio_start);
    }

    #[test]
    fn empty_metadata_blob_is_allowed() {
        let bytes = build_header(b"keyblob", b"", b"", b"AUDIO");
        let container = Container::parse(&mut Cursor::new(&bytes)).unwrap();
        assert!(container.meta_blob.is_empty());
    }

    #[test]
    fn wrong_signature_is_rejected_up_front() {
        let mut bytes = build_header(b"keyblob", b"", b"", b"AUDIO");
        bytes[0] = b'X';
        let err = Container::parse(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, NcmError::InvalidFormat));
    }

    #[test]
    fn short_read_reports_truncation() {
        let bytes = build_header(b"keyblob", b"metablob", b"", b"");
        let err = Container::parse(&mut Cursor::new(&bytes[..20])).unwrap_err();
        assert!(matches!(err, NcmError::TruncatedContainer(_)));
    }
}
