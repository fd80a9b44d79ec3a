use anyhow::anyhow;

/// Useful extension methods for iterators
pub(crate) trait IteratorExt {
    /// Tries to collect the items of the iterator into a `Vec` that reserves the given capacity and stops as soon as an error is encountered
    ///
    /// Motivation: <https://github.com/rust-lang/rust/issues/48994>
    fn try_collect_with_capacity<T, E>(self, capacity: usize) -> Result<Vec<T>, E>
    where
        Self: Sized + Iterator<Item = Result<T, E>>;
}

impl<Iter: Iterator> IteratorExt for Iter {
    fn try_collect_with_capacity<T, E>(mut self, capacity: usize) -> Result<Vec<T>, E>
    where
        Self: Sized + Iterator<Item = Result<T, E>>,
    {
        self.try_fold(Vec::with_capacity(capacity), |mut vec, item| {
            vec.push(item?);
            Ok(vec)
        })
    }
}

/// Byte order of binary encoded values
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Decodes a buffer of fixed size binary values into `f64`, returns an error if the buffer length is not a multiple of the value size
pub(crate) fn decode_values<const N: usize>(
    bytes: &[u8],
    endianness: Endianness,
    convert: fn([u8; N], Endianness) -> f64,
) -> Result<Vec<f64>, anyhow::Error> {
    if bytes.len() % N != 0 {
        return Err(anyhow!(
            "buffer of {} bytes is not a multiple of the value size {}",
            bytes.len(),
            N
        ));
    }

    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            Ok(convert(raw, endianness))
        })
        .try_collect_with_capacity(bytes.len() / N)
}

/// Generates a converter from raw bytes of the given primitive type to `f64`
macro_rules! bytes_to_f64 {
    ($t:ty) => {
        |raw, endianness| {
            match endianness {
                $crate::io::io_utils::Endianness::Little => <$t>::from_le_bytes(raw) as f64,
                $crate::io::io_utils::Endianness::Big => <$t>::from_be_bytes(raw) as f64,
            }
        }
    };
}

pub(crate) use bytes_to_f64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_values() {
        let bytes = [1u8, 0, 0, 1];
        assert_eq!(
            decode_values::<2>(&bytes, Endianness::Little, bytes_to_f64!(u16)).unwrap(),
            vec![1.0, 256.0]
        );
        assert_eq!(
            decode_values::<2>(&bytes, Endianness::Big, bytes_to_f64!(u16)).unwrap(),
            vec![256.0, 1.0]
        );
        assert!(decode_values::<4>(&bytes[..3], Endianness::Little, bytes_to_f64!(f32)).is_err());
    }
}
