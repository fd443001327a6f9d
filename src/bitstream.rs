//! Bit-granularity stream reader.
//!
//! Wraps an in-memory byte slice (the runtime never seeks backward, only
//! the bytecode cursor rewinds — see `runtime.rs`) and exposes bit-level
//! reads with configurable bit ordering, a byte counter driven purely by
//! *fully consumed* bytes, alignment, and non-destructive end-of-stream
//! probing, per spec.md §4.1.
//!
//! Bit extraction itself is delegated to `bitstream_io::BitReader`, the
//! same crate the teacher crate wraps in its own `Msb`/`Lsb` container
//! enum (`analyze_utils::BitReaderContainer`); this module adds the byte
//! counter and alignment semantics bitstream-io doesn't need to provide.

use crate::error::ParseError;
use bitstream_io::{BigEndian, BitRead, BitReader, LittleEndian};
use std::io::Cursor;

/// Bit ordering within each source byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// Least-significant bit consumed first.
    Lsb,
    /// Most-significant bit consumed first.
    Msb,
}

impl Default for BitOrder {
    fn default() -> Self {
        BitOrder::Lsb
    }
}

/// Byte order used to assemble multi-byte scalars from individually-read
/// bytes. Orthogonal to [`BitOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

enum Container<'a> {
    Msb(BitReader<Cursor<&'a [u8]>, BigEndian>),
    Lsb(BitReader<Cursor<&'a [u8]>, LittleEndian>),
}

impl Container<'_> {
    fn read(&mut self, bits: u32) -> std::io::Result<u64> {
        match self {
            Container::Msb(r) => r.read(bits),
            Container::Lsb(r) => r.read(bits),
        }
    }
}

pub struct BitStreamReader<'a> {
    container: Container<'a>,
    total_bits: u64,
    bits_consumed: u64,
    counter_origin: u64,
}

impl<'a> BitStreamReader<'a> {
    pub fn new(data: &'a [u8], bit_order: BitOrder) -> Self {
        let container = match bit_order {
            BitOrder::Msb => Container::Msb(BitReader::endian(Cursor::new(data), BigEndian)),
            BitOrder::Lsb => Container::Lsb(BitReader::endian(Cursor::new(data), LittleEndian)),
        };
        Self {
            container,
            total_bits: data.len() as u64 * 8,
            bits_consumed: 0,
            counter_origin: 0,
        }
    }

    fn bits_remaining(&self) -> u64 {
        self.total_bits - self.bits_consumed
    }

    /// Non-destructive end-of-stream probe: true if at least one more bit
    /// can be read.
    pub fn has_available_data(&self) -> bool {
        self.bits_remaining() > 0
    }

    /// Number of fully-consumed bytes since the last [`Self::reset_counter`]
    /// (or since construction). A byte with unread bits does not count
    /// until those bits are consumed or [`Self::align_to_byte`] is called.
    pub fn counter(&self) -> u64 {
        (self.bits_consumed - self.counter_origin) / 8
    }

    /// Consumes `n` bits (1..=64) and returns them right-aligned in a
    /// `u64`. Fails with [`ParseError::EndOfStream`] if fewer than `n`
    /// bits remain.
    pub fn read_bits(&mut self, n: u32) -> Result<u64, ParseError> {
        if (n as u64) > self.bits_remaining() {
            return Err(ParseError::EndOfStream { context: format!("{n}-bit field") });
        }
        let value = self
            .container
            .read(n)
            .map_err(|_| ParseError::EndOfStream { context: format!("{n}-bit field") })?;
        self.bits_consumed += n as u64;
        Ok(value)
    }

    /// Reads `n` repetitions of a `width`-bit value; `n == -1` reads until
    /// fewer than `width` bits remain.
    pub fn read_bits_array(&mut self, n: i64, width: u32) -> Result<Vec<u64>, ParseError> {
        let mut out = Vec::new();
        if n < 0 {
            while self.bits_remaining() >= width as u64 {
                out.push(self.read_bits(width)?);
            }
        } else {
            out.reserve(n as usize);
            for _ in 0..n {
                out.push(self.read_bits(width)?);
            }
        }
        Ok(out)
    }

    /// Discards any bits already latched from a partial byte, finalising
    /// that byte into [`Self::counter`] without reading further source
    /// bytes (spec.md §4.1).
    pub fn align_to_byte(&mut self) -> Result<(), ParseError> {
        let rem = (self.bits_consumed % 8) as u32;
        if rem != 0 {
            let pad = 8 - rem;
            self.container
                .read(pad)
                .map_err(|_| ParseError::Internal("align_to_byte ran out of latched bits".into()))?;
            self.bits_consumed += pad as u64;
        }
        Ok(())
    }

    /// `align_to_byte` followed by zeroing the counter; subsequent `$$`
    /// references count bytes consumed since this call.
    pub fn reset_counter(&mut self) -> Result<(), ParseError> {
        self.align_to_byte()?;
        self.counter_origin = self.bits_consumed;
        Ok(())
    }

    pub fn read_unsigned_byte(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_byte(&mut self) -> Result<i8, ParseError> {
        Ok(self.read_unsigned_byte()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, ParseError> {
        Ok(self.read_unsigned_byte()? != 0)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ParseError> {
        (0..n).map(|_| self.read_unsigned_byte()).collect()
    }

    fn assemble(bytes: &[u8], order: ByteOrder) -> u64 {
        let mut value: u64 = 0;
        match order {
            ByteOrder::Big => {
                for &b in bytes {
                    value = (value << 8) | b as u64;
                }
            }
            ByteOrder::Little => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | b as u64;
                }
            }
        }
        value
    }

    pub fn read_unsigned_short(&mut self, order: ByteOrder) -> Result<u16, ParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(Self::assemble(&bytes, order) as u16)
    }

    pub fn read_short(&mut self, order: ByteOrder) -> Result<i16, ParseError> {
        Ok(self.read_unsigned_short(order)? as i16)
    }

    pub fn read_int(&mut self, order: ByteOrder) -> Result<i32, ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(Self::assemble(&bytes, order) as u32 as i32)
    }

    pub fn read_long(&mut self, order: ByteOrder) -> Result<i64, ParseError> {
        let bytes = self.read_bytes(8)?;
        Ok(Self::assemble(&bytes, order) as i64)
    }

    pub fn skip_bytes(&mut self, n: u64) -> Result<(), ParseError> {
        if n * 8 > self.bits_remaining() {
            return Err(ParseError::EndOfStream { context: "skip".into() });
        }
        for _ in 0..n {
            self.read_unsigned_byte()?;
        }
        Ok(())
    }

    pub fn align_to_modulus(&mut self, modulus: u64) -> Result<(), ParseError> {
        self.align_to_byte()?;
        while self.counter() % modulus != 0 {
            if !self.has_available_data() {
                return Err(ParseError::EndOfStream { context: "align".into() });
            }
            self.read_unsigned_byte()?;
        }
        Ok(())
    }

    fn read_array_with<T>(
        &mut self,
        n: i64,
        width_bytes: u64,
        mut read_one: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut out = Vec::new();
        if n < 0 {
            while self.bits_remaining() >= width_bytes * 8 {
                out.push(read_one(self)?);
            }
        } else {
            out.reserve(n as usize);
            for _ in 0..n {
                out.push(read_one(self)?);
            }
        }
        Ok(out)
    }

    pub fn read_byte_array(&mut self, n: i64) -> Result<Vec<i8>, ParseError> {
        self.read_array_with(n, 1, |r| r.read_byte())
    }

    pub fn read_unsigned_byte_array(&mut self, n: i64) -> Result<Vec<u8>, ParseError> {
        self.read_array_with(n, 1, |r| r.read_unsigned_byte())
    }

    pub fn read_short_array(&mut self, n: i64, order: ByteOrder) -> Result<Vec<i16>, ParseError> {
        self.read_array_with(n, 2, |r| r.read_short(order))
    }

    pub fn read_unsigned_short_array(
        &mut self,
        n: i64,
        order: ByteOrder,
    ) -> Result<Vec<u16>, ParseError> {
        self.read_array_with(n, 2, |r| r.read_unsigned_short(order))
    }

    pub fn read_int_array(&mut self, n: i64, order: ByteOrder) -> Result<Vec<i32>, ParseError> {
        self.read_array_with(n, 4, |r| r.read_int(order))
    }

    pub fn read_long_array(&mut self, n: i64, order: ByteOrder) -> Result<Vec<i64>, ParseError> {
        self.read_array_with(n, 8, |r| r.read_long(order))
    }

    pub fn read_bool_array(&mut self, n: i64) -> Result<Vec<bool>, ParseError> {
        self.read_array_with(n, 1, |r| r.read_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_len_example() {
        // `ubyte len; byte[len] data;` on `03 0A 0B 0C` (spec.md §8 scenario 1).
        let data = [0x03, 0x0A, 0x0B, 0x0C];
        let mut r = BitStreamReader::new(&data, BitOrder::Lsb);
        let len = r.read_unsigned_byte().unwrap();
        assert_eq!(len, 3);
        let bytes = r.read_byte_array(len as i64).unwrap();
        assert_eq!(bytes, vec![0x0A, 0x0B, 0x0C]);
        assert_eq!(r.counter(), 4);
    }

    #[test]
    fn bit_fields_lsb_vs_msb() {
        // `bit:4 a; bit:4 b;` on `A5` (spec.md §8 scenario 3).
        let data = [0xA5u8];
        let mut lsb = BitStreamReader::new(&data, BitOrder::Lsb);
        assert_eq!(lsb.read_bits(4).unwrap(), 5);
        assert_eq!(lsb.read_bits(4).unwrap(), 10);

        let mut msb = BitStreamReader::new(&data, BitOrder::Msb);
        assert_eq!(msb.read_bits(4).unwrap(), 10);
        assert_eq!(msb.read_bits(4).unwrap(), 5);
    }

    #[test]
    fn counter_only_advances_on_full_bytes() {
        let data = [0xFFu8, 0xFF];
        let mut r = BitStreamReader::new(&data, BitOrder::Lsb);
        r.read_bits(4).unwrap();
        assert_eq!(r.counter(), 0);
        r.read_bits(4).unwrap();
        assert_eq!(r.counter(), 1);
    }

    #[test]
    fn align_to_byte_finalises_partial_byte_without_skipping() {
        let data = [0b1111_0000u8, 0xAA];
        let mut r = BitStreamReader::new(&data, BitOrder::Lsb);
        r.read_bits(4).unwrap();
        assert_eq!(r.counter(), 0);
        r.align_to_byte().unwrap();
        assert_eq!(r.counter(), 1);
        // The next read starts at byte 1, not mid-byte-0's discarded bits.
        assert_eq!(r.read_unsigned_byte().unwrap(), 0xAA);
    }

    #[test]
    fn reset_counter_aligns_first() {
        let data = [0xFFu8, 0x01];
        let mut r = BitStreamReader::new(&data, BitOrder::Lsb);
        r.read_bits(4).unwrap();
        r.reset_counter().unwrap();
        assert_eq!(r.counter(), 0);
        r.read_unsigned_byte().unwrap();
        assert_eq!(r.counter(), 1);
    }

    #[test]
    fn whole_stream_array_reads_until_exhausted() {
        let data = [1u8, 2, 3, 4, 5];
        let mut r = BitStreamReader::new(&data, BitOrder::Lsb);
        let arr = r.read_unsigned_byte_array(-1).unwrap();
        assert_eq!(arr, vec![1, 2, 3, 4, 5]);
        assert!(!r.has_available_data());
    }

    #[test]
    fn multi_byte_endianness() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut big = BitStreamReader::new(&data, BitOrder::Lsb);
        assert_eq!(big.read_int(ByteOrder::Big).unwrap(), 0x0102_0304);

        let mut little = BitStreamReader::new(&data, BitOrder::Lsb);
        assert_eq!(little.read_int(ByteOrder::Little).unwrap(), 0x0403_0201u32 as i32);
    }

    #[test]
    fn short_skip_is_fatal() {
        let data = [0u8; 2];
        let mut r = BitStreamReader::new(&data, BitOrder::Lsb);
        assert!(r.skip_bytes(5).is_err());
    }
}
