use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("{0} is neither gzip nor zstd compressed")]
    UnknownFormat(PathBuf),
    #[error("failed to decompress {0}: {1}")]
    Corrupt(PathBuf, #[source] io::Error),
    #[error("io error on {0}: {1}")]
    Io(PathBuf, #[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
}

impl Compression {
    pub fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(&GZIP_MAGIC) {
            Some(Compression::Gzip)
        } else if header.starts_with(&ZSTD_MAGIC) {
            Some(Compression::Zstd)
        } else {
            None
        }
    }
}

/// Decompresses `source` and appends the result to `destination`, creating
/// it if needed. Returns the number of decompressed bytes appended.
pub fn append_decompressed(source: &Path, destination: &Path) -> Result<u64, DecompressError> {
    let mut input = BufReader::new(
        File::open(source).map_err(|e| DecompressError::Io(source.to_path_buf(), e))?,
    );

    let mut header = [0u8; 4];
    let read = read_header(&mut input, &mut header)
        .map_err(|e| DecompressError::Io(source.to_path_buf(), e))?;
    let compression = Compression::detect(&header[..read])
        .ok_or_else(|| DecompressError::UnknownFormat(source.to_path_buf()))?;

    // the header bytes were consumed, feed them back in front of the rest
    let input = (&header[..read]).chain(input);

    let output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .map_err(|e| DecompressError::Io(destination.to_path_buf(), e))?;
    let mut output = BufWriter::new(output);

    let appended = match compression {
        Compression::Gzip => copy_decoded(flate2::read::MultiGzDecoder::new(input), &mut output),
        Compression::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(input)
                .map_err(|e| DecompressError::Corrupt(source.to_path_buf(), e))?;
            copy_decoded(decoder, &mut output)
        }
    }
    .map_err(|e| match e {
        CopyError::Read(e) => DecompressError::Corrupt(source.to_path_buf(), e),
        CopyError::Write(e) => DecompressError::Io(destination.to_path_buf(), e),
    })?;

    output
        .flush()
        .map_err(|e| DecompressError::Io(destination.to_path_buf(), e))?;

    log::debug!(
        "appended {} decompressed bytes ({:?}) from {} to {}",
        appended,
        compression,
        source.display(),
        destination.display()
    );
    Ok(appended)
}

fn read_header<R: Read>(reader: &mut R, header: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

// io::copy can't tell a corrupt archive from a full disk, so copy by hand
fn copy_decoded<R: Read, W: Write>(mut reader: R, writer: &mut W) -> Result<u64, CopyError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
}
