//! Tuple layout and codec.
//!
//! A tuple is a 36-byte prefix followed by the row bytes:
//!   XMin(8) + XMax(8) + Cid(4) + TableID(4) + RowID(8) + DataLen(4) + Data

use bytes::{Buf, BufMut};

use crate::error::StorageError;
use crate::{CommandId, PageId, Result, TxnId, INVALID_TXN_ID};

pub const TUPLE_HEADER_SIZE: usize = 36;

/// A row version with its MVCC metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    /// Transaction that created this version.
    pub xmin: TxnId,
    /// Transaction that deleted this version (0 if alive).
    pub xmax: TxnId,
    /// Command ID within the creating transaction.
    pub cid: CommandId,
    pub table_id: u32,
    /// Encodes the version's physical home: `(page_id << 16) | slot_num`.
    pub row_id: u64,
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn is_deleted(&self) -> bool {
        self.xmax != INVALID_TXN_ID
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TUPLE_HEADER_SIZE + self.data.len());
        buf.put_u64_le(self.xmin);
        buf.put_u64_le(self.xmax);
        buf.put_u32_le(self.cid);
        buf.put_u32_le(self.table_id);
        buf.put_u64_le(self.row_id);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf
    }

    pub fn deserialize(mut buf: &[u8]) -> Result<Tuple> {
        if buf.len() < TUPLE_HEADER_SIZE {
            return Err(StorageError::Corruption(
                "buffer too small for tuple header".to_string(),
            ));
        }
        let xmin = buf.get_u64_le();
        let xmax = buf.get_u64_le();
        let cid = buf.get_u32_le();
        let table_id = buf.get_u32_le();
        let row_id = buf.get_u64_le();
        let data_len = buf.get_u32_le() as usize;
        if buf.remaining() < data_len {
            return Err(StorageError::Corruption(
                "buffer too small for tuple data".to_string(),
            ));
        }
        Ok(Tuple {
            xmin,
            xmax,
            cid,
            table_id,
            row_id,
            data: buf[..data_len].to_vec(),
        })
    }
}

/// Packs a physical tuple location into a row id.
pub fn encode_row_id(page_id: PageId, slot_num: u16) -> u64 {
    (page_id as u64) << 16 | slot_num as u64
}

/// Unpacks a row id back into its (page, slot) location.
pub fn decode_row_id(row_id: u64) -> (PageId, u16) {
    ((row_id >> 16) as PageId, (row_id & 0xFFFF) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_deserialize_round_trip() {
        let tuple = Tuple {
            xmin: 7,
            xmax: 12,
            cid: 3,
            table_id: 2,
            row_id: encode_row_id(5, 9),
            data: b"row bytes".to_vec(),
        };
        let restored = Tuple::deserialize(&tuple.serialize()).expect("deserialize");
        assert_eq!(restored, tuple);
    }

    #[test]
    fn empty_data_round_trip() {
        let tuple = Tuple {
            xmin: 1,
            xmax: 0,
            cid: 0,
            table_id: 1,
            row_id: 0,
            data: Vec::new(),
        };
        let bytes = tuple.serialize();
        assert_eq!(bytes.len(), TUPLE_HEADER_SIZE);
        assert_eq!(Tuple::deserialize(&bytes).expect("deserialize"), tuple);
    }

    #[test]
    fn truncated_buffer_is_corruption() {
        let tuple = Tuple {
            xmin: 1,
            xmax: 0,
            cid: 0,
            table_id: 1,
            row_id: 0,
            data: b"abc".to_vec(),
        };
        let bytes = tuple.serialize();
        assert!(Tuple::deserialize(&bytes[..TUPLE_HEADER_SIZE - 1]).is_err());
        assert!(Tuple::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn row_id_round_trip() {
        let row_id = encode_row_id(0x0001_0203, 0x0405);
        assert_eq!(decode_row_id(row_id), (0x0001_0203, 0x0405));
    }
}
