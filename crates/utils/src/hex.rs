//! Hex dump formatting for packet tracing.
//!
//! Pure functions, no allocation: each dump line is rendered into a caller
//! supplied buffer so it can be used from any context.

/// Bytes rendered per dump line.
pub const BYTES_PER_LINE: usize = 16;

/// Size of the buffer [`dump_line`] renders into: "oooo:" plus " xx" per byte.
pub const LINE_LEN: usize = 5 + BYTES_PER_LINE * 3;

#[inline]
#[must_use]
pub fn nibble_to_hex(nibble: u8) -> u8 {
    if nibble < 10 {
        b'0' + nibble
    } else {
        b'a' + (nibble - 10)
    }
}

/// Render one dump line for `chunk` (at most [`BYTES_PER_LINE`] bytes, extra
/// bytes are ignored) starting at `offset` within the packet.
#[must_use]
pub fn dump_line<'a>(offset: usize, chunk: &[u8], buf: &'a mut [u8; LINE_LEN]) -> &'a str {
    let offset = (offset & 0xffff) as u16;
    for (i, shift) in [12u16, 8, 4, 0].into_iter().enumerate() {
        buf[i] = nibble_to_hex(((offset >> shift) & 0xf) as u8);
    }
    buf[4] = b':';

    let mut len = 5;
    for byte in chunk.iter().take(BYTES_PER_LINE) {
        buf[len] = b' ';
        buf[len + 1] = nibble_to_hex(byte >> 4);
        buf[len + 2] = nibble_to_hex(byte & 0xf);
        len += 3;
    }
    core::str::from_utf8(&buf[..len]).unwrap_or("")
}
