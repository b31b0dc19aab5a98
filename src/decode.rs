use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::container::Container;
use crate::crypto;
use crate::error::{NcmError, Result};
use crate::keystream::{self, Keystream, Positioning, PROBE_BLOCK};
use crate::meta;

/// Streaming chunk size for the payload pass.
const CHUNK_SIZE: usize = 0x8000;

/// Extension used when neither metadata nor magic detection names one.
const DEFAULT_FORMAT: &str = "mp3";

/// Bytes of raw ciphertext persisted when no variant matches.
const DEBUG_SNIPPET: usize = 16;

#[derive(Debug, Default)]
pub struct DecodeOptions {
    /// Where output lands; the input's own directory when unset.
    pub output_dir: Option<PathBuf>,
    /// Position interpretation for the Legacy/Modern keystreams.
    pub positioning: Positioning,
}

/// The decoded artifact: where the audio landed and how many bytes it is.
#[derive(Debug)]
pub struct DecodedAudio {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Decodes one container file end to end. All state is local to this
/// call; both file handles close on every exit path.
pub fn decode_file(input: &Path, options: &DecodeOptions) -> Result<DecodedAudio> {
    let output_dir = match &options.output_dir {
        Some(dir) => dir.clone(),
        None => input.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
    };

    let mut file = File::open(input)?;
    let container = Container::parse(&mut file)?;

    let raw_key = crypto::unwrap_key(&container.key_blob)?;
    let key_box = crypto::build_key_box(&raw_key);

    let metadata = meta::unwrap_meta(&container.meta_blob);
    if !container.meta_blob.is_empty() && metadata.is_none() {
        eprintln!("  warning: metadata blob could not be parsed, falling back to magic bytes");
    }
    if let Some(name) = metadata.as_ref().and_then(|m| m.music_name.as_deref()) {
        println!("  track: {}", name);
    }

    let mut first_block = vec![0u8; PROBE_BLOCK];
    let read = read_up_to(&mut file, &mut first_block)?;
    first_block.truncate(read);
    if first_block.is_empty() {
        return Err(NcmError::TruncatedContainer("audio payload"));
    }

    let probe = match keystream::probe(&key_box, &first_block, options.positioning) {
        Some(probe) => probe,
        None => {
            write_debug_snippet(&output_dir, input, &first_block)?;
            return Err(NcmError::NoMatchingVariant);
        }
    };

    let extension = metadata
        .as_ref()
        .and_then(|m| m.format_hint())
        .unwrap_or(probe.format);
    let output_path = output_dir.join(output_name(input, extension));

    fs::create_dir_all(&output_dir)?;
    let mut writer = BufWriter::new(File::create(&output_path)?);

    // The probe already decrypted the first block; emit it as-is and
    // run the streaming pass on a fresh box copy over the remainder.
    writer.write_all(&probe.first_block)?;
    let mut total = probe.first_block.len() as u64;

    let mut stream = Keystream::new(probe.variant, key_box, options.positioning);
    stream.skip(probe.first_block.len());

    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read = read_up_to(&mut file, &mut chunk)?;
        if read == 0 {
            break;
        }
        stream.apply(&mut chunk[..read]);
        writer.write_all(&chunk[..read])?;
        total += read as u64;
    }
    writer.flush()?;

    Ok(DecodedAudio {
        path: output_path,
        bytes: total,
    })
}

/// Fills as much of `buf` as the reader can provide, tolerating short
/// reads; only a true zero-byte first read means end of stream.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn output_name(input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("output"));
    PathBuf::from(format!("{}.{}", stem, extension))
}

/// Persists the leading raw ciphertext bytes of an undecodable file so
/// the variant can be worked out by hand later. This is the only
/// artifact a failed file leaves behind.
fn write_debug_snippet(output_dir: &Path, input: &Path, block: &[u8]) -> Result<()> {
    let debug_dir = output_dir.join("debug");
    fs::create_dir_all(&debug_dir)?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("output"));
    let snippet = &block[..block.len().min(DEBUG_SNIPPET)];
    fs::write(debug_dir.join(format!("{}.debug", stem)), snippet)?;
    Ok(())
}
