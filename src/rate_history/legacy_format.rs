//! Big-endian binary layout written by older releases:
//!
//! ```text
//! u16 entry_count
//! entry_count * { u8 addr_len, addr_len bytes (UTF-8), u8 rate_count, rate_count * u32 }
//! ```
//!
//! Read for compatibility; only [`encode`] exists for tests and tooling.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::rate_history_error::RateHistoryError;

pub fn decode(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u32>>, RateHistoryError> {
    let truncated = |what: &str| RateHistoryError::LegacyFormat(format!("truncated {what}"));
    let mut cursor = Cursor::new(bytes);
    let mut rates = BTreeMap::new();

    let entries = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| truncated("entry count"))?;

    for _ in 0..entries {
        let addr_len = cursor.read_u8().map_err(|_| truncated("address length"))?;
        let mut addr = vec![0_u8; usize::from(addr_len)];
        cursor
            .read_exact(&mut addr)
            .map_err(|_| truncated("address"))?;
        let addr = String::from_utf8(addr)
            .map_err(|_| RateHistoryError::LegacyFormat("address is not UTF-8".into()))?;

        let count = cursor.read_u8().map_err(|_| truncated("rate count"))?;
        let list = (0..count)
            .map(|_| cursor.read_u32::<BigEndian>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| truncated("rate list"))?;
        rates.insert(addr, list);
    }

    let consumed = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
    if consumed != bytes.len() {
        return Err(RateHistoryError::LegacyFormat(format!(
            "{} trailing bytes",
            bytes.len().saturating_sub(consumed)
        )));
    }
    Ok(rates)
}

pub fn encode(rates: &BTreeMap<String, Vec<u32>>) -> Result<Vec<u8>, RateHistoryError> {
    let too_long = |what: &str| RateHistoryError::LegacyFormat(format!("too many {what}"));
    let mut out = Vec::new();

    out.write_u16::<BigEndian>(u16::try_from(rates.len()).map_err(|_| too_long("entries"))?)?;
    for (addr, list) in rates {
        out.write_u8(u8::try_from(addr.len()).map_err(|_| too_long("address bytes"))?)?;
        out.extend_from_slice(addr.as_bytes());
        out.write_u8(u8::try_from(list.len()).map_err(|_| too_long("rates"))?)?;
        for rate in list {
            out.write_u32::<BigEndian>(*rate)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn decodes_hand_built_bytes() {
        let mut bytes = vec![0x00, 0x01, 7];
        bytes.extend_from_slice(b"1.2.3.4");
        bytes.push(2);
        bytes.extend_from_slice(&600_000_u32.to_be_bytes());
        bytes.extend_from_slice(&700_000_u32.to_be_bytes());

        let rates = decode(&bytes).unwrap();
        assert_eq!(rates["1.2.3.4"], vec![600_000, 700_000]);
    }

    #[test]
    fn trailing_or_missing_bytes_are_rejected() {
        let mut rates = BTreeMap::new();
        rates.insert("h".to_owned(), vec![1, 2]);
        let mut bytes = encode(&rates).unwrap();

        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(RateHistoryError::LegacyFormat(_))));
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(decode(&bytes), Err(RateHistoryError::LegacyFormat(_))));
        assert!(decode(&[]).is_err());
    }
}
