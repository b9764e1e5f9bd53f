// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Binary n-dimensional numeric arrays.
//!
//! Blob layout, integers little-endian:
//!
//! ```text
//! +--------+---------+-----------+--------+-------------------+------------------+
//! | "NDAR" | version | dtype tag |  ndim  | ndim x u64 dims   | element bytes    |
//! | 4 bytes|  u8 (1) |    u8     |   u8   | 8 * ndim bytes    | itemsize * count |
//! +--------+---------+-----------+--------+-------------------+------------------+
//! ```
//!
//! Elements are stored row-major in little-endian byte order. Only the
//! primitive numeric dtypes below exist; there is no way to smuggle an
//! object graph through this format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::MessageType;
use crate::{AppError, AppResult};

const MAGIC: &[u8; 4] = b"NDAR";
const VERSION: u8 = 1;
const MAX_NDIM: usize = 32;
const PREAMBLE_LEN: usize = MAGIC.len() + 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn itemsize(self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            DType::Bool => b'?',
            DType::U8 => b'B',
            DType::U16 => b'H',
            DType::U32 => b'I',
            DType::U64 => b'Q',
            DType::I8 => b'b',
            DType::I16 => b'h',
            DType::I32 => b'i',
            DType::I64 => b'q',
            DType::F32 => b'f',
            DType::F64 => b'd',
        }
    }

    pub fn from_tag(tag: u8) -> AppResult<DType> {
        let dtype = match tag {
            b'?' => DType::Bool,
            b'B' => DType::U8,
            b'H' => DType::U16,
            b'I' => DType::U32,
            b'Q' => DType::U64,
            b'b' => DType::I8,
            b'h' => DType::I16,
            b'i' => DType::I32,
            b'q' => DType::I64,
            b'f' => DType::F32,
            b'd' => DType::F64,
            other => {
                return Err(AppError::Decode(format!(
                    "unsupported array element type tag 0x{other:02x}"
                )))
            }
        };
        Ok(dtype)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Primitive element types an [`NdArray`] can hold.
pub trait Element: sealed::Sealed + Copy + Sized {
    const DTYPE: DType;

    fn write_le(self, buffer: &mut BytesMut);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn write_le(self, buffer: &mut BytesMut) {
                    buffer.put_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

impl sealed::Sealed for bool {}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_le(self, buffer: &mut BytesMut) {
        buffer.put_u8(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// A dense row-major array: shape, element type and raw little-endian
/// element bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl NdArray {
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> AppResult<NdArray> {
        let count = element_count(&shape)?;
        if count != values.len() {
            return Err(AppError::InvalidValue(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                count,
                values.len()
            )));
        }
        let mut data = BytesMut::with_capacity(count * T::DTYPE.itemsize());
        for value in values {
            value.write_le(&mut data);
        }
        NdArray::from_raw(T::DTYPE, shape, data.freeze())
    }

    /// Builds an array from raw little-endian element bytes.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Bytes) -> AppResult<NdArray> {
        if shape.len() > MAX_NDIM {
            return Err(AppError::InvalidValue(format!(
                "{} dimensions exceed the limit of {}",
                shape.len(),
                MAX_NDIM
            )));
        }
        let expected = element_count(&shape)?
            .checked_mul(dtype.itemsize())
            .ok_or_else(|| AppError::InvalidValue(format!("shape {shape:?} is too large")))?;
        if expected != data.len() {
            return Err(AppError::InvalidValue(format!(
                "shape {:?} of {:?} needs {} bytes, got {}",
                shape,
                dtype,
                expected,
                data.len()
            )));
        }
        Ok(NdArray { dtype, shape, data })
    }

    pub fn zeros(dtype: DType, shape: Vec<usize>) -> AppResult<NdArray> {
        let len = element_count(&shape)?
            .checked_mul(dtype.itemsize())
            .ok_or_else(|| AppError::InvalidValue(format!("shape {shape:?} is too large")))?;
        NdArray::from_raw(dtype, shape, Bytes::from(vec![0u8; len]))
    }

    pub fn to_vec<T: Element>(&self) -> AppResult<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(AppError::InvalidValue(format!(
                "array holds {:?}, requested {:?}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.itemsize())
            .map(T::read_le)
            .collect())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.itemsize()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn raw_data(&self) -> &Bytes {
        &self.data
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buffer =
            BytesMut::with_capacity(PREAMBLE_LEN + 8 * self.shape.len() + self.data.len());
        buffer.put_slice(MAGIC);
        buffer.put_u8(VERSION);
        buffer.put_u8(self.dtype.tag());
        buffer.put_u8(self.shape.len() as u8);
        for dim in &self.shape {
            buffer.put_u64_le(*dim as u64);
        }
        buffer.put_slice(&self.data);
        buffer.freeze()
    }

    pub fn from_bytes(mut blob: Bytes) -> AppResult<NdArray> {
        if blob.remaining() < PREAMBLE_LEN {
            return Err(AppError::Decode(format!(
                "array blob of {} bytes is shorter than its preamble",
                blob.remaining()
            )));
        }
        if &blob[..MAGIC.len()] != MAGIC {
            return Err(AppError::Decode("array blob has wrong magic".into()));
        }
        blob.advance(MAGIC.len());
        let version = blob.get_u8();
        if version != VERSION {
            return Err(AppError::Decode(format!(
                "unsupported array blob version {version}"
            )));
        }
        let dtype = DType::from_tag(blob.get_u8())?;
        let ndim = blob.get_u8() as usize;
        if ndim > MAX_NDIM {
            return Err(AppError::Decode(format!(
                "{ndim} dimensions exceed the limit of {MAX_NDIM}"
            )));
        }
        if blob.remaining() < ndim * 8 {
            return Err(AppError::Decode("array blob ends inside its shape".into()));
        }
        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            let dim = usize::try_from(blob.get_u64_le())
                .map_err(|_| AppError::Decode("array dimension overflows usize".into()))?;
            shape.push(dim);
        }
        NdArray::from_raw(dtype, shape, blob).map_err(|e| match e {
            AppError::InvalidValue(msg) => AppError::Decode(msg),
            other => other,
        })
    }
}

fn element_count(shape: &[usize]) -> AppResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| AppError::InvalidValue(format!("shape {shape:?} overflows")))
}

/// Message type for [`NdArray`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericArray;

impl MessageType for NumericArray {
    type Value = NdArray;

    fn encode(&self, value: &NdArray) -> AppResult<Bytes> {
        Ok(value.to_bytes())
    }

    fn decode(&self, payload: Bytes) -> AppResult<NdArray> {
        NdArray::from_bytes(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let array = NdArray::from_vec(vec![2, 2], vec![1u16, 2, 3, 4]).unwrap();
        let blob = array.to_bytes();
        assert_eq!(&blob[..4], b"NDAR");
        assert_eq!(blob[4], 1);
        assert_eq!(blob[5], b'H');
        assert_eq!(blob[6], 2);
        assert_eq!(&blob[7..15], &2u64.to_le_bytes());
        assert_eq!(&blob[15..23], &2u64.to_le_bytes());
        assert_eq!(&blob[23..], &[1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn test_round_trip_keeps_shape_and_dtype() {
        let image = NdArray::from_vec(
            vec![2, 3, 3],
            (0..18).map(|v| v as f32 * 0.5).collect::<Vec<f32>>(),
        )
        .unwrap();
        let decoded = NumericArray.decode(NumericArray.encode(&image).unwrap()).unwrap();
        assert_eq!(decoded.shape(), &[2, 3, 3]);
        assert_eq!(decoded.dtype(), DType::F32);
        assert_eq!(decoded.to_vec::<f32>().unwrap(), image.to_vec::<f32>().unwrap());

        let scalar = NdArray::from_vec(vec![], vec![-7i64]).unwrap();
        assert_eq!(NumericArray.decode(scalar.to_bytes()).unwrap(), scalar);

        let empty = NdArray::zeros(DType::U8, vec![0, 640]).unwrap();
        let decoded = NumericArray.decode(empty.to_bytes()).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.shape(), &[0, 640]);

        let mask = NdArray::from_vec(vec![3], vec![true, false, true]).unwrap();
        assert_eq!(
            NumericArray.decode(mask.to_bytes()).unwrap().to_vec::<bool>().unwrap(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(NdArray::from_vec(vec![2, 2], vec![1u8, 2, 3]).is_err());
        let array = NdArray::from_vec(vec![2], vec![1i32, 2]).unwrap();
        assert!(array.to_vec::<f32>().is_err());
    }

    #[test]
    fn test_too_many_dimensions_rejected() {
        let err = NdArray::from_vec(vec![1; MAX_NDIM + 1], vec![7u8]).unwrap_err();
        assert!(matches!(err, AppError::InvalidValue(_)), "{err}");
        assert!(NdArray::from_vec(vec![1; 257], vec![7u8]).is_err());

        let deepest = NdArray::from_vec(vec![1; MAX_NDIM], vec![7u8]).unwrap();
        let decoded = NdArray::from_bytes(deepest.to_bytes()).unwrap();
        assert_eq!(decoded.shape().len(), MAX_NDIM);
    }

    #[test]
    fn test_corrupt_blobs_rejected() {
        let blob = NdArray::from_vec(vec![4], vec![1.0f64, 2.0, 3.0, 4.0])
            .unwrap()
            .to_bytes();

        let mut bad_magic = BytesMut::from(&blob[..]);
        bad_magic[0] = b'X';
        assert!(matches!(
            NumericArray.decode(bad_magic.freeze()),
            Err(AppError::Decode(_))
        ));

        // 'O' would be an object dtype, never accepted
        let mut object_dtype = BytesMut::from(&blob[..]);
        object_dtype[5] = b'O';
        assert!(matches!(
            NumericArray.decode(object_dtype.freeze()),
            Err(AppError::Decode(_))
        ));

        let short_data = blob.slice(..blob.len() - 1);
        assert!(matches!(
            NumericArray.decode(short_data),
            Err(AppError::Decode(_))
        ));

        assert!(matches!(
            NumericArray.decode(blob.slice(..5)),
            Err(AppError::Decode(_))
        ));

        let mut huge = BytesMut::new();
        huge.put_slice(b"NDAR");
        huge.put_u8(1);
        huge.put_u8(b'd');
        huge.put_u8(2);
        huge.put_u64_le(u64::MAX);
        huge.put_u64_le(u64::MAX);
        assert!(matches!(
            NumericArray.decode(huge.freeze()),
            Err(AppError::Decode(_))
        ));
    }
}
