//! Row fingerprints for change detection.
//!
//! A checksum is the MD5 digest of the row's checksum columns joined with
//! [`SEPARATOR`], read as a big-endian integer and written in base 32 with
//! the digits `0-9A-V`. There is no zero padding, so the length varies; values
//! are only ever compared for equality.
//!
//! Field values that themselves contain `||` can make two different rows join
//! to the same string. Stored checksums depend on this exact encoding, so it is
//! kept as is.

use crate::core::value::Row;
use crate::error::Result;

/// Joins column renderings before hashing.
pub const SEPARATOR: &str = "||";

const DIGITS: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";

/// Compute the checksum of `row` over `columns`, in the given order.
///
/// NULL renders as the empty string. A column missing from the row is an
/// error. An empty column list hashes the empty string; config validation
/// rejects that case before it gets here.
pub fn row_checksum(row: &Row, columns: &[String]) -> Result<String> {
    let mut pieces = Vec::with_capacity(columns.len());
    for column in columns {
        let value = row.require(column)?;
        pieces.push(value.canonical_text().unwrap_or_default());
    }
    Ok(checksum_str(&pieces.join(SEPARATOR)))
}

/// Checksum of an already-joined string.
pub fn checksum_str(input: &str) -> String {
    let digest = md5::compute(input.as_bytes());
    to_base32(u128::from_be_bytes(digest.0))
}

fn to_base32(mut n: u128) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(26);
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    out.reverse();
    // DIGITS is ASCII
    out.into_iter().map(char::from).collect()
}
