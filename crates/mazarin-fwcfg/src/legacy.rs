//! Traditional selector/data interface.
//!
//! Writing the selector rewinds the device cursor to offset 0 of the chosen
//! entry; every data register access then consumes as many bytes as it is
//! wide. Selecting again mid-sequence restarts the entry, so a sequential
//! read must select exactly once.
//!
//! The interface has no error reporting. Reading beyond the size listed in
//! the file directory is undefined at the device, so callers bound every
//! read with that size.

use crate::codec;
use crate::io::{DataWidth, RegisterIo};

/// Points the device cursor at offset 0 of `key`.
pub fn select<I: RegisterIo + ?Sized>(io: &mut I, key: u16) {
    io.write_selector(codec::selector_word(key));
    io.barrier();
}

/// Fills `dst` from the current entry without reselecting.
///
/// Uses `width`-sized accesses while a whole word remains and single bytes
/// for the tail, so the cursor never moves past `dst.len()`.
pub fn read_bytes<I: RegisterIo + ?Sized>(io: &mut I, width: DataWidth, dst: &mut [u8]) {
    let step = width.bytes();
    let mut chunks = dst.chunks_exact_mut(step);
    for chunk in &mut chunks {
        let word = io.read_data(width);
        codec::unpack_data_word(width, word, chunk);
    }
    for byte in chunks.into_remainder() {
        *byte = io.read_data(DataWidth::Byte) as u8;
    }
}

/// Writes `src` to the current entry, preserving stream byte order.
pub fn write_bytes<I: RegisterIo + ?Sized>(io: &mut I, width: DataWidth, src: &[u8]) {
    let step = width.bytes();
    let mut chunks = src.chunks_exact(step);
    for chunk in &mut chunks {
        io.write_data(width, codec::pack_data_word(width, chunk));
    }
    for &byte in chunks.remainder() {
        io.write_data(DataWidth::Byte, byte as u64);
    }
    io.barrier();
}

/// Advances the cursor by `count` bytes, discarding the data.
pub fn skip<I: RegisterIo + ?Sized>(io: &mut I, width: DataWidth, count: usize) {
    let step = width.bytes();
    for _ in 0..count / step {
        io.read_data(width);
    }
    for _ in 0..count % step {
        io.read_data(DataWidth::Byte);
    }
}

/// Reads a big-endian `u32` from the current entry.
pub fn read_be_u32<I: RegisterIo + ?Sized>(io: &mut I, width: DataWidth) -> u32 {
    let mut buf = [0u8; 4];
    read_bytes(io, width, &mut buf);
    codec::be_u32(&buf)
}
