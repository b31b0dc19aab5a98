use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;

mod container;
mod crypto;
mod decode;
mod error;
mod keystream;
mod meta;

use decode::DecodeOptions;
use keystream::Positioning;

/// Decrypts ncm music containers back into plain audio files.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// An .ncm file, or a directory of them to process in order.
    input: PathBuf,

    /// Output directory; defaults to each input file's own directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compute keystream positions from the absolute payload offset
    /// instead of restarting at each chunk boundary.
    #[arg(long)]
    absolute_offset: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !cli.input.exists() {
        bail!("input {:?} does not exist", cli.input);
    }
    if let Some(output) = &cli.output {
        if output.is_file() {
            bail!("output {:?} is a file, not a directory", output);
        }
        std::fs::create_dir_all(output)
            .with_context(|| format!("creating output directory {:?}", output))?;
    }

    let options = DecodeOptions {
        output_dir: cli.output,
        positioning: if cli.absolute_offset {
            Positioning::AbsoluteOffset
        } else {
            Positioning::ChunkRelative
        },
    };

    if cli.input.is_file() {
        let decoded = decode::decode_file(&cli.input, &options)
            .with_context(|| format!("decoding {:?}", cli.input))?;
        println!(
            "{} -> {} ({} bytes)",
            cli.input.display(),
            decoded.path.display(),
            decoded.bytes
        );
        return Ok(());
    }

    decode_directory(&cli.input, &options)
}

/// Sequential batch over a directory: top-level *.ncm files first,
/// recursing only when the top level has none. One file's failure is
/// reported and the batch moves on.
fn decode_directory(dir: &Path, options: &DecodeOptions) -> anyhow::Result<()> {
    let mut files = collect_ncm_files(dir, false)?;
    if files.is_empty() {
        files = collect_ncm_files(dir, true)?;
    }
    if files.is_empty() {
        bail!("no .ncm files found under {:?}", dir);
    }
    files.sort();

    println!("found {} ncm files", files.len());

    let mut succeeded = 0usize;
    let mut failed: Vec<(PathBuf, String)> = Vec::new();

    for file in &files {
        println!("processing {}", file.display());
        match decode::decode_file(file, options) {
            Ok(decoded) => {
                println!("  ok: {} ({} bytes)", decoded.path.display(), decoded.bytes);
                succeeded += 1;
            }
            Err(e) => {
                eprintln!("  failed: {}", e);
                failed.push((file.clone(), e.to_string()));
            }
        }
    }

    println!("done: {}/{} succeeded", succeeded, files.len());
    if !failed.is_empty() {
        eprintln!("failed files:");
        for (file, reason) in &failed {
            eprintln!("  {} ({})", file.display(), reason);
        }
    }
    Ok(())
}

fn collect_ncm_files(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                files.extend(collect_ncm_files(&path, true)?);
            }
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ncm"))
        {
            files.push(path);
        }
    }
    Ok(files)
}
