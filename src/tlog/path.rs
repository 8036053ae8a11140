//! Tile Path Encoding
//!
//! Tile indexes map to object-store paths as groups of three decimal
//! digits, every group except the last prefixed with `x`:
//!
//! - `42` → `042`
//! - `1234067` → `x001/x234/067`
//!
//! The parser is strict: anything that does not round-trip back to the
//! identical string is rejected.

use super::TlogError;

/// Encode a tile index as its path fragment.
pub fn encode_index(index: u64) -> String {
    let mut groups = Vec::new();
    let mut n = index;
    loop {
        groups.push((n % 1000) as u16);
        n /= 1000;
        if n == 0 {
            break;
        }
    }
    groups.reverse();

    let last = groups.len() - 1;
    groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            if i == last {
                format!("{:03}", g)
            } else {
                format!("x{:03}", g)
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Parse a tile index path fragment, rejecting non-canonical forms.
pub fn parse_index(path: &str) -> Result<u64, TlogError> {
    let malformed = || TlogError::MalformedPath(path.to_string());

    let mut value: u64 = 0;
    let segments: Vec<&str> = path.split('/').collect();
    if segments.is_empty() {
        return Err(malformed());
    }
    let last = segments.len() - 1;
    for (i, seg) in segments.iter().enumerate() {
        let digits = if i == last {
            if seg.len() != 3 {
                return Err(malformed());
            }
            *seg
        } else {
            seg.strip_prefix('x').ok_or_else(malformed)?
        };
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let group: u64 = digits.parse().map_err(|_| malformed())?;
        value = value
            .checked_mul(1000)
            .and_then(|v| v.checked_add(group))
            .ok_or_else(malformed)?;
    }

    // Reject redundant leading groups such as x000/042
    if encode_index(value) != path {
        return Err(malformed());
    }
    Ok(value)
}

/// Key of a full entry tile: `tile/entries/<path>`
pub fn entry_tile_key(index: u64) -> String {
    format!("tile/entries/{}", encode_index(index))
}

/// Key of a partial entry tile: `tile/entries/<path>.p/<W>`
pub fn entry_tile_partial_key(index: u64, width: usize) -> String {
    format!("tile/entries/{}.p/{}", encode_index(index), width)
}

/// Key of a full hash tile: `tile/<L>/<path>`
pub fn hash_tile_key(level: u8, index: u64) -> String {
    format!("tile/{}/{}", level, encode_index(index))
}

/// Key of a partial hash tile: `tile/<L>/<path>.p/<W>`
pub fn hash_tile_partial_key(level: u8, index: u64, width: usize) -> String {
    format!("tile/{}/{}.p/{}", level, encode_index(index), width)
}
