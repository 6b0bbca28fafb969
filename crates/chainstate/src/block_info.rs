//! Per-header index record and its validation status.

use bitd_primitives::block::BlockHeader;
use bitd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use primitive_types::U256;

/// Validation state of a known header. `ValidHeader` may move to `Valid` or
/// `Invalid`; `Valid` and `InActiveChain` flip back and forth as the active
/// tip moves. `Invalid` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockStatus {
    ValidHeader = 1,
    Invalid = 2,
    Valid = 3,
    InActiveChain = 4,
}

impl BlockStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::ValidHeader),
            2 => Some(Self::Invalid),
            3 => Some(Self::Valid),
            4 => Some(Self::InActiveChain),
            _ => None,
        }
    }
}

/// One record per known header. `chainwork` is recomputed at startup and
/// never persisted; the serialized form is header, height, status, and the
/// downloaded flag.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockInfo {
    pub header: BlockHeader,
    pub height: u32,
    pub status: BlockStatus,
    pub downloaded: bool,
    pub chainwork: U256,
}

impl BlockInfo {
    pub fn new(header: BlockHeader, height: u32, chainwork: U256) -> Self {
        Self {
            header,
            height,
            status: BlockStatus::ValidHeader,
            downloaded: false,
            chainwork,
        }
    }

    pub fn with_status(mut self, status: BlockStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_downloaded(mut self, downloaded: bool) -> Self {
        self.downloaded = downloaded;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode(&mut encoder);
        encoder.write_varint(self.height as u64);
        encoder.write_u8(self.status.as_u8());
        encoder.write_u8(self.downloaded as u8);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode(&mut decoder)?;
        let height = decoder.read_varint()?;
        let height = u32::try_from(height).map_err(|_| DecodeError::SizeTooLarge)?;
        let status = BlockStatus::from_u8(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("unknown block status"))?;
        let downloaded = decoder.read_u8()? != 0;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            header,
            height,
            status,
            downloaded,
            chainwork: U256::zero(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(tag: u8) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: [tag; 32],
            merkle_root: [0u8; 32],
            time: 1_300_000_000,
            bits: 0x207fffff,
            nonce: tag as u32,
        }
    }

    #[test]
    fn round_trips_all_states() {
        for status in [
            BlockStatus::ValidHeader,
            BlockStatus::Invalid,
            BlockStatus::Valid,
            BlockStatus::InActiveChain,
        ] {
            for downloaded in [false, true] {
                for height in [0u32, 1, 255, 0xffff, 1_000_000] {
                    let info = BlockInfo {
                        header: sample_header(3),
                        height,
                        status,
                        downloaded,
                        chainwork: U256::zero(),
                    };
                    let decoded = BlockInfo::decode(&info.encode()).expect("round trip");
                    assert_eq!(decoded, info);
                }
            }
        }
    }

    #[test]
    fn rejects_unknown_status_byte() {
        let info = BlockInfo {
            header: sample_header(1),
            height: 5,
            status: BlockStatus::Valid,
            downloaded: true,
            chainwork: U256::zero(),
        };
        let mut bytes = info.encode();
        let status_at = bytes.len() - 2;
        bytes[status_at] = 9;
        assert!(BlockInfo::decode(&bytes).is_err());
    }
}
