//! Bounds-checked decoding of fixed-layout values from an untrusted byte
//! buffer.
//!
//! A [`Decoder`] wraps a borrowed slice together with the [`ByteOrder`] the
//! values in it are stored in. Random-access reads (`*_at`) never move the
//! cursor; streaming reads advance it only when the read succeeds.

use nom::{
    number::{complete, Endianness},
    IResult,
};

use crate::macho::{MachOErr, MachOResult};

/// Byte order of the multi-byte values in an image, derived once from its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// The order that is the opposite of this one.
    pub fn swapped(self) -> ByteOrder {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }
}

impl From<ByteOrder> for Endianness {
    fn from(order: ByteOrder) -> Self {
        match order {
            ByteOrder::Little => Endianness::Little,
            ByteOrder::Big => Endianness::Big,
        }
    }
}

/// A value with a fixed on-disk size that can be read in either byte order.
pub trait Decode: Sized {
    const SIZE: usize;

    fn decode_from(bytes: &[u8], order: ByteOrder) -> IResult<&[u8], Self>;
}

impl Decode for u8 {
    const SIZE: usize = 1;

    fn decode_from(bytes: &[u8], _order: ByteOrder) -> IResult<&[u8], Self> {
        complete::u8(bytes)
    }
}

impl Decode for u16 {
    const SIZE: usize = 2;

    fn decode_from(bytes: &[u8], order: ByteOrder) -> IResult<&[u8], Self> {
        complete::u16(order.into())(bytes)
    }
}

impl Decode for u32 {
    const SIZE: usize = 4;

    fn decode_from(bytes: &[u8], order: ByteOrder) -> IResult<&[u8], Self> {
        complete::u32(order.into())(bytes)
    }
}

impl Decode for u64 {
    const SIZE: usize = 8;

    fn decode_from(bytes: &[u8], order: ByteOrder) -> IResult<&[u8], Self> {
        complete::u64(order.into())(bytes)
    }
}

impl Decode for i32 {
    const SIZE: usize = 4;

    fn decode_from(bytes: &[u8], order: ByteOrder) -> IResult<&[u8], Self> {
        complete::i32(order.into())(bytes)
    }
}

/// Fixed-width name fields and UUIDs. Byte order does not apply.
impl Decode for [u8; 16] {
    const SIZE: usize = 16;

    fn decode_from(bytes: &[u8], _order: ByteOrder) -> IResult<&[u8], Self> {
        let (rest, taken) =
            nom::bytes::complete::take::<usize, &[u8], nom::error::Error<&[u8]>>(16usize)(bytes)?;
        let mut array = [0u8; 16];
        array.copy_from_slice(taken);
        Ok((rest, array))
    }
}

/// Implements [`Decode`] for a `#[derive(Nom)]` record of the given byte size.
macro_rules! impl_decode_for_record {
    ($ty:ty, $size:expr) => {
        impl $crate::decoder::Decode for $ty {
            const SIZE: usize = $size;

            fn decode_from(
                bytes: &[u8],
                order: $crate::decoder::ByteOrder,
            ) -> nom::IResult<&[u8], Self> {
                use nom_derive::Parse;
                match order {
                    $crate::decoder::ByteOrder::Little => <$ty>::parse_le(bytes),
                    $crate::decoder::ByteOrder::Big => <$ty>::parse_be(bytes),
                }
            }
        }
    };
}
pub(crate) use impl_decode_for_record;

#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    data: &'a [u8],
    position: usize,
    order: ByteOrder,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Decoder {
            data,
            position: 0,
            order,
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Same bytes, read in a different byte order. The cursor is kept.
    pub fn with_order(&self, order: ByteOrder) -> Self {
        Decoder { order, ..*self }
    }

    /// Moves the cursor. Seeking to the very end of the buffer is allowed.
    pub fn seek(&mut self, offset: usize) -> MachOResult<()> {
        if offset > self.data.len() {
            return Err(MachOErr::OffsetOutOfBounds {
                offset,
                length: self.data.len(),
            });
        }
        self.position = offset;
        Ok(())
    }

    /// Validates that `size` bytes are readable at `offset`.
    fn check(&self, offset: usize, size: usize) -> MachOResult<()> {
        let length = self.data.len();
        if offset >= length {
            return Err(MachOErr::OffsetOutOfBounds { offset, length });
        }
        let available = length - offset;
        if size > available {
            return Err(MachOErr::InsufficientData {
                required: size,
                available,
            });
        }
        Ok(())
    }

    pub fn bytes_at(&self, offset: usize, length: usize) -> MachOResult<&'a [u8]> {
        if length == 0 && offset <= self.data.len() {
            return Ok(&self.data[offset..offset]);
        }
        self.check(offset, length)?;
        Ok(&self.data[offset..offset + length])
    }

    pub fn decode_at<T: Decode>(&self, offset: usize) -> MachOResult<T> {
        self.check(offset, T::SIZE)?;
        let (_, value) = T::decode_from(&self.data[offset..offset + T::SIZE], self.order)?;
        Ok(value)
    }

    pub fn decode<T: Decode>(&mut self) -> MachOResult<T> {
        let value = self.decode_at(self.position)?;
        self.position += T::SIZE;
        Ok(value)
    }

    /// Like [`Decoder::decode_at`] but also requires `offset` to be a multiple
    /// of `alignment`.
    pub fn decode_aligned_at<T: Decode>(&self, offset: usize, alignment: usize) -> MachOResult<T> {
        if alignment > 1 && offset % alignment != 0 {
            return Err(MachOErr::MisalignedData { offset, alignment });
        }
        self.decode_at(offset)
    }

    pub fn decode_array_at<T: Decode>(
        &self,
        offset: usize,
        count: usize,
        max_count: usize,
    ) -> MachOResult<Vec<T>> {
        if count > max_count {
            return Err(MachOErr::InvalidArrayCount {
                count,
                max: max_count,
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let total = count.checked_mul(T::SIZE).ok_or(MachOErr::InvalidArrayCount {
            count,
            max: max_count,
        })?;
        self.check(offset, total)?;

        let mut cursor = &self.data[offset..offset + total];
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let (next, value) = T::decode_from(cursor, self.order)?;
            values.push(value);
            cursor = next;
        }
        Ok(values)
    }

    pub fn decode_array<T: Decode>(&mut self, count: usize, max_count: usize) -> MachOResult<Vec<T>> {
        let values = self.decode_array_at(self.position, count, max_count)?;
        self.position += values.len() * T::SIZE;
        Ok(values)
    }

    /// Reads a null-terminated UTF-8 string whose terminator lies within
    /// `max_length` bytes of `offset`. Returns the string and the number of
    /// bytes consumed including the terminator.
    fn string_at(&self, offset: usize, max_length: usize) -> MachOResult<(String, usize)> {
        if offset >= self.data.len() {
            return Err(MachOErr::OffsetOutOfBounds {
                offset,
                length: self.data.len(),
            });
        }
        let window = &self.data[offset..offset + max_length.min(self.data.len() - offset)];
        let end = window
            .iter()
            .position(|b| *b == 0)
            .ok_or(MachOErr::InvalidString { offset })?;
        let string = std::str::from_utf8(&window[..end])
            .map_err(|_| MachOErr::InvalidString { offset })?;
        Ok((string.to_string(), end + 1))
    }

    pub fn decode_string_at(&self, offset: usize, max_length: usize) -> MachOResult<String> {
        self.string_at(offset, max_length).map(|(string, _)| string)
    }

    pub fn decode_string(&mut self, max_length: usize) -> MachOResult<String> {
        let (string, consumed) = self.string_at(self.position, max_length)?;
        self.position += consumed;
        Ok(string)
    }

    /// A decoder over `[offset, offset + length)`, or to the end of the buffer
    /// when `length` is `None`. The new decoder's cursor starts at zero.
    pub fn sub_decoder(&self, offset: usize, length: Option<usize>) -> MachOResult<Decoder<'a>> {
        let length = match length {
            Some(length) => length,
            None => self.data.len().saturating_sub(offset),
        };
        self.check(offset, length)?;
        Ok(Decoder::new(&self.data[offset..offset + length], self.order))
    }
}
