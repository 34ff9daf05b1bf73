//! Compressor negotiation and codec for OP_COMPRESSED bodies (C2), per spec §3 "Connection" and
//! §6's `compressors` connection-string option.

use std::io::Write;

use crate::error::{Error, ErrorKind, ProtocolError, Result};

/// The numeric compressor id exchanged on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CompressorId {
    Noop = 0,
    Snappy = 1,
    Zlib = 2,
    Zstd = 3,
}

impl CompressorId {
    pub fn from_u8(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressorId::Noop),
            1 => Ok(CompressorId::Snappy),
            2 => Ok(CompressorId::Zlib),
            3 => Ok(CompressorId::Zstd),
            other => Err(ErrorKind::Protocol(ProtocolError::Codec {
                message: format!("unknown compressor id {other}"),
            })
            .into()),
        }
    }
}

/// A negotiated compressor, per spec §3's connection invariant. `Noop` means no compression was
/// negotiated (the common case when the caller's `compressors` list and the server's advertised
/// list share nothing).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compressor {
    Noop,
    Snappy,
    Zlib { level: u32 },
    Zstd { level: i32 },
}

impl Compressor {
    pub fn id(self) -> CompressorId {
        match self {
            Compressor::Noop => CompressorId::Noop,
            Compressor::Snappy => CompressorId::Snappy,
            Compressor::Zlib { .. } => CompressorId::Zlib,
            Compressor::Zstd { .. } => CompressorId::Zstd,
        }
    }

    /// Chooses the first of `preferred` (in the caller's declared order) that also appears in
    /// `server_supported`, per spec §9's Open Question on compressor negotiation precedence.
    pub fn negotiate(preferred: &[Compressor], server_supported: &[CompressorId]) -> Compressor {
        for candidate in preferred {
            if server_supported.contains(&candidate.id()) {
                return *candidate;
            }
        }
        Compressor::Noop
    }

    pub fn compress(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Noop => Ok(body.to_vec()),
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => {
                let mut encoder = snap::write::FrameEncoder::new(Vec::new());
                encoder.write_all(body).map_err(codec_err)?;
                encoder.into_inner().map_err(|e| codec_err(e.into_error()))
            }
            #[cfg(not(feature = "snappy-compression"))]
            Compressor::Snappy => Err(unsupported("snappy")),
            #[cfg(feature = "zlib-compression")]
            Compressor::Zlib { level } => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level));
                encoder.write_all(body).map_err(codec_err)?;
                encoder.finish().map_err(codec_err)
            }
            #[cfg(not(feature = "zlib-compression"))]
            Compressor::Zlib { .. } => Err(unsupported("zlib")),
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { level } => zstd::encode_all(body, level).map_err(codec_err),
            #[cfg(not(feature = "zstd-compression"))]
            Compressor::Zstd { .. } => Err(unsupported("zstd")),
        }
    }

    pub fn decompress(id: CompressorId, body: &[u8]) -> Result<Vec<u8>> {
        match id {
            CompressorId::Noop => Ok(body.to_vec()),
            #[cfg(feature = "snappy-compression")]
            CompressorId::Snappy => {
                let mut decoder = snap::read::FrameDecoder::new(body);
                let mut out = Vec::new();
                std::io::copy(&mut decoder, &mut out).map_err(codec_err)?;
                Ok(out)
            }
            #[cfg(not(feature = "snappy-compression"))]
            CompressorId::Snappy => Err(unsupported("snappy")),
            #[cfg(feature = "zlib-compression")]
            CompressorId::Zlib => {
                let mut decoder = flate2::read::ZlibDecoder::new(body);
                let mut out = Vec::new();
                std::io::copy(&mut decoder, &mut out).map_err(codec_err)?;
                Ok(out)
            }
            #[cfg(not(feature = "zlib-compression"))]
            CompressorId::Zlib => Err(unsupported("zlib")),
            #[cfg(feature = "zstd-compression")]
            CompressorId::Zstd => zstd::decode_all(body).map_err(codec_err),
            #[cfg(not(feature = "zstd-compression"))]
            CompressorId::Zstd => Err(unsupported("zstd")),
        }
    }
}

#[allow(dead_code)]
fn codec_err(e: std::io::Error) -> Error {
    ErrorKind::Protocol(ProtocolError::Codec { message: e.to_string() }).into()
}

#[allow(dead_code)]
fn unsupported(name: &str) -> Error {
    ErrorKind::Protocol(ProtocolError::Codec {
        message: format!("compressor {name} not enabled in this build"),
    })
    .into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn negotiate_picks_first_mutually_supported_in_caller_order() {
        let preferred = [Compressor::Zstd { level: 1 }, Compressor::Zlib { level: 6 }];
        let server_supported = [CompressorId::Zlib, CompressorId::Snappy];
        assert_eq!(
            Compressor::negotiate(&preferred, &server_supported).id(),
            CompressorId::Zlib
        );
    }

    #[test]
    fn negotiate_falls_back_to_noop() {
        let preferred = [Compressor::Zstd { level: 1 }];
        let server_supported = [CompressorId::Snappy];
        assert_eq!(Compressor::negotiate(&preferred, &server_supported), Compressor::Noop);
    }

    #[cfg(feature = "zlib-compression")]
    #[test]
    fn zlib_round_trips() {
        let body = b"hello mongodb wire protocol";
        let compressed = Compressor::Zlib { level: 6 }.compress(body).unwrap();
        let decompressed = Compressor::decompress(CompressorId::Zlib, &compressed).unwrap();
        assert_eq!(decompressed, body);
    }
}
