//! Model artifact format.
//!
//! ```text
//! ┌──────────┬───────────┬─────────┬──────────────┬──────────────┬──────────┐
//! │ "LTLM"   │ version   │ flags   │ payload_len  │ xxh3-64      │ reserved │
//! │ 4 bytes  │ u32 LE    │ u32 LE  │ u64 LE       │ u64 LE       │ u32      │
//! ├──────────┴───────────┴─────────┴──────────────┴──────────────┴──────────┤
//! │ bincode payload: args, dictionary, input weights, output weights         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use lightlm_core::{Error, Result, RowMatrix};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::args::Args;
use crate::dictionary::Dictionary;
use crate::model::Weights;

/// Magic bytes at the start of every artifact.
pub const MAGIC: [u8; 4] = *b"LTLM";

/// Current artifact version. Newer versions are rejected.
pub const FORMAT_VERSION: u32 = 1;

/// Input matrix is quantized.
pub const FLAG_QUANT_INPUT: u32 = 1;
/// Output matrix is quantized.
pub const FLAG_QUANT_OUTPUT: u32 = 1 << 1;

/// Fixed-size artifact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub flags: u32,
    pub payload_len: u64,
    pub checksum: u64,
}

impl Header {
    /// Header size in bytes
    pub const SIZE: usize = 32;

    fn for_payload(flags: u32, payload: &[u8]) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags,
            payload_len: payload.len() as u64,
            checksum: xxh3_64(payload),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.flags.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.payload_len.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::format("header truncated"));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(Error::format("bad magic bytes"));
        }
        let version = read_u32(bytes, 4);
        if version > FORMAT_VERSION {
            return Err(Error::format(format!(
                "artifact version {version} is newer than supported version {FORMAT_VERSION}"
            )));
        }
        if version == 0 {
            return Err(Error::format("artifact version 0 is invalid"));
        }
        Ok(Self {
            magic,
            version,
            flags: read_u32(bytes, 8),
            payload_len: read_u64(bytes, 12),
            checksum: read_u64(bytes, 20),
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Everything needed to serve a trained model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Artifact {
    pub args: Args,
    pub dictionary: Dictionary,
    pub input: Weights,
    pub output: Weights,
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    args: &'a Args,
    dictionary: &'a Dictionary,
    input: &'a Weights,
    output: &'a Weights,
}

impl Artifact {
    fn flags(input: &Weights, output: &Weights) -> u32 {
        let mut flags = 0;
        if input.is_quantized() {
            flags |= FLAG_QUANT_INPUT;
        }
        if output.is_quantized() {
            flags |= FLAG_QUANT_OUTPUT;
        }
        flags
    }

    /// Check that the sections agree with each other.
    pub fn validate(&self) -> Result<()> {
        self.dictionary.validate()?;
        self.input.validate()?;
        self.output.validate()?;

        let dim = self.args.dim;
        if self.input.cols() != dim || self.output.cols() != dim {
            return Err(Error::format("matrix width does not match dim"));
        }
        let input_rows = self.dictionary.nwords() + self.dictionary.bucket();
        if self.input.rows() != input_rows {
            return Err(Error::format(format!(
                "input matrix has {} rows, dictionary needs {input_rows}",
                self.input.rows()
            )));
        }
        let output_rows = if self.args.is_supervised() {
            self.dictionary.nlabels()
        } else {
            self.dictionary.nwords()
        };
        if self.output.rows() != output_rows {
            return Err(Error::format(format!(
                "output matrix has {} rows, dictionary needs {output_rows}",
                self.output.rows()
            )));
        }
        Ok(())
    }
}

/// Serialize the sections into header plus payload.
pub fn encode(args: &Args, dictionary: &Dictionary, input: &Weights, output: &Weights) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&ArtifactRef {
        args,
        dictionary,
        input,
        output,
    })
    .map_err(|e| Error::format(e.to_string()))?;

    let header = Header::for_payload(Artifact::flags(input, output), &payload);
    let mut bytes = Vec::with_capacity(Header::SIZE + payload.len());
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Parse and verify a complete artifact.
pub fn decode(bytes: &[u8]) -> Result<Artifact> {
    let header = Header::from_bytes(bytes)?;
    let payload = &bytes[Header::SIZE..];
    if (payload.len() as u64) < header.payload_len {
        return Err(Error::format(format!(
            "payload truncated: {} of {} bytes",
            payload.len(),
            header.payload_len
        )));
    }
    if payload.len() as u64 > header.payload_len {
        return Err(Error::format("trailing bytes after payload"));
    }
    if xxh3_64(payload) != header.checksum {
        return Err(Error::format("checksum mismatch"));
    }

    let artifact: Artifact =
        bincode::deserialize(payload).map_err(|e| Error::format(e.to_string()))?;
    if Artifact::flags(&artifact.input, &artifact.output) != header.flags {
        return Err(Error::format("header flags disagree with payload"));
    }
    artifact.validate()?;
    Ok(artifact)
}

pub fn write_file(
    path: &Path,
    args: &Args,
    dictionary: &Dictionary,
    input: &Weights,
    output: &Weights,
) -> Result<()> {
    let bytes = encode(args, dictionary, input, output)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

pub fn read_file(path: &Path) -> Result<Artifact> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header::for_payload(FLAG_QUANT_INPUT, b"payload");
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"LTLM");
        assert_eq!(bytes[4..8], 1u32.to_le_bytes());
        assert_eq!(bytes[12..20], 7u64.to_le_bytes());
        assert_eq!(bytes[28..32], [0, 0, 0, 0]);
        assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejections() {
        let good = Header::for_payload(0, b"x").to_bytes();

        let mut bad = good;
        bad[0] = b'X';
        assert!(Header::from_bytes(&bad).unwrap_err().to_string().contains("magic"));

        let mut future = good;
        future[4..8].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        assert_eq!(Header::from_bytes(&future).unwrap_err().category(), "format");

        assert!(Header::from_bytes(&good[..10]).is_err());
    }

    #[test]
    fn test_decode_rejects_checksum_mismatch() {
        let payload = b"not a model".to_vec();
        let mut bytes = Header::for_payload(0, &payload).to_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_decode_rejects_garbage_payload() {
        let payload = vec![0xffu8; 16];
        let mut bytes = Header::for_payload(0, &payload).to_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        assert_eq!(decode(&bytes).unwrap_err().category(), "format");
    }
}
