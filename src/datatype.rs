//! Payload element trait and datatype tag mapping.
//!
//! This module provides the [`Element`] trait, which maps a Rust type to a
//! [`DatatypeTag`] and a byte encoding. Every operation in the crate moves
//! "N elements of type T through contiguous memory"; `Element` is what turns
//! those elements into bytes a [`Transport`](crate::Transport) can carry.
//!
//! # Supported Types
//!
//! | Rust Type        | Encoding            | Tag          |
//! |------------------|---------------------|--------------|
//! | `f32`, `f64`     | native-endian bytes | `F32`, `F64` |
//! | `i8` .. `i64`    | native-endian bytes | `I8` .. `I64`|
//! | `u8` .. `u64`    | native-endian bytes | `U8` .. `U64`|
//! | `String`, `bool`, `char` | bincode     | `Serialized` |
//! | [`Serialized<T>`] for any serde type | bincode | `Serialized` |
//!
//! Arithmetic types additionally implement [`Arithmetic`], which is what the
//! built-in [`ReduceOp`](crate::ReduceOp) reductions require.

use crate::error::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul};

/// Tag describing how a message payload was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32 = 0,
    /// 64-bit floating point
    F64 = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// 64-bit signed integer
    I64 = 3,
    /// 8-bit unsigned integer
    U8 = 4,
    /// 32-bit unsigned integer
    U32 = 5,
    /// 64-bit unsigned integer
    U64 = 6,
    /// 8-bit signed integer
    I8 = 7,
    /// 16-bit signed integer
    I16 = 8,
    /// 16-bit unsigned integer
    U16 = 9,
    /// Variable-size payload encoded with bincode
    Serialized = 10,
}

impl DatatypeTag {
    /// Width in bytes of one element, or `None` for serialized payloads.
    pub fn width(self) -> Option<usize> {
        match self {
            DatatypeTag::I8 | DatatypeTag::U8 => Some(1),
            DatatypeTag::I16 | DatatypeTag::U16 => Some(2),
            DatatypeTag::F32 | DatatypeTag::I32 | DatatypeTag::U32 => Some(4),
            DatatypeTag::F64 | DatatypeTag::I64 | DatatypeTag::U64 => Some(8),
            DatatypeTag::Serialized => None,
        }
    }

    /// Whether elements of this tag have a fixed width.
    pub fn is_native(self) -> bool {
        self.width().is_some()
    }
}

impl fmt::Display for DatatypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Trait for types that can travel through a process group.
///
/// Implementations exist for the fixed-width arithmetic types, for `String`,
/// `bool` and `char`, and for [`Serialized<T>`] wrapping any serde type.
///
/// # Example
///
/// ```
/// use ferrogroup::{DatatypeTag, Element};
///
/// let bytes = f64::encode(&[1.0, 2.0]).unwrap();
/// assert_eq!(bytes.len(), 16);
/// assert_eq!(f64::decode(&bytes).unwrap(), vec![1.0, 2.0]);
/// assert_eq!(<f64 as Element>::TAG, DatatypeTag::F64);
/// ```
pub trait Element: Clone + Send + 'static {
    /// The tag recorded in every message carrying this type.
    const TAG: DatatypeTag;

    /// Encode a contiguous run of elements.
    fn encode(items: &[Self]) -> Result<Vec<u8>, TransportError>;

    /// Decode a payload produced by [`encode`](Self::encode).
    fn decode(bytes: &[u8]) -> Result<Vec<Self>, TransportError>;
}

/// Element types supporting the built-in reductions.
pub trait Arithmetic:
    Element + Copy + PartialOrd + Add<Output = Self> + Mul<Output = Self>
{
}

macro_rules! impl_native_element {
    ($ty:ty, $tag:expr) => {
        impl Element for $ty {
            const TAG: DatatypeTag = $tag;

            fn encode(items: &[Self]) -> Result<Vec<u8>, TransportError> {
                let mut bytes = Vec::with_capacity(std::mem::size_of_val(items));
                for item in items {
                    bytes.extend_from_slice(&item.to_ne_bytes());
                }
                Ok(bytes)
            }

            fn decode(bytes: &[u8]) -> Result<Vec<Self>, TransportError> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                if bytes.len() % WIDTH != 0 {
                    return Err(TransportError::Codec(format!(
                        "{} bytes is not a whole number of {} elements",
                        bytes.len(),
                        stringify!($ty)
                    )));
                }
                Ok(bytes
                    .chunks_exact(WIDTH)
                    .map(|chunk| {
                        let mut raw = [0u8; WIDTH];
                        raw.copy_from_slice(chunk);
                        <$ty>::from_ne_bytes(raw)
                    })
                    .collect())
            }
        }

        impl Arithmetic for $ty {}
    };
}

impl_native_element!(f32, DatatypeTag::F32);
impl_native_element!(f64, DatatypeTag::F64);
impl_native_element!(i8, DatatypeTag::I8);
impl_native_element!(i16, DatatypeTag::I16);
impl_native_element!(i32, DatatypeTag::I32);
impl_native_element!(i64, DatatypeTag::I64);
impl_native_element!(u8, DatatypeTag::U8);
impl_native_element!(u16, DatatypeTag::U16);
impl_native_element!(u32, DatatypeTag::U32);
impl_native_element!(u64, DatatypeTag::U64);

fn encode_serialized<T: Serialize>(items: &[T]) -> Result<Vec<u8>, TransportError> {
    Ok(bincode::serialize(items)?)
}

fn decode_serialized<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, TransportError> {
    Ok(bincode::deserialize(bytes)?)
}

macro_rules! impl_serialized_element {
    ($($ty:ty),*) => {
        $(
            impl Element for $ty {
                const TAG: DatatypeTag = DatatypeTag::Serialized;

                fn encode(items: &[Self]) -> Result<Vec<u8>, TransportError> {
                    encode_serialized(items)
                }

                fn decode(bytes: &[u8]) -> Result<Vec<Self>, TransportError> {
                    decode_serialized(bytes)
                }
            }
        )*
    };
}

impl_serialized_element!(String, bool, char);

/// Adapter carrying any serde type as a group payload.
///
/// # Example
///
/// ```
/// use ferrogroup::{Element, Serialized};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// struct Tally {
///     name: String,
///     hits: u64,
/// }
///
/// let items = vec![Serialized(Tally { name: "flux".into(), hits: 7 })];
/// let bytes = Serialized::encode(&items).unwrap();
/// assert_eq!(Serialized::<Tally>::decode(&bytes).unwrap(), items);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serialized<T>(pub T);

impl<T> Serialized<T> {
    /// Unwrap the inner value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Serialized<T> {
    fn from(value: T) -> Self {
        Serialized(value)
    }
}

impl<T> Element for Serialized<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    const TAG: DatatypeTag = DatatypeTag::Serialized;

    fn encode(items: &[Self]) -> Result<Vec<u8>, TransportError> {
        encode_serialized(items)
    }

    fn decode(bytes: &[u8]) -> Result<Vec<Self>, TransportError> {
        decode_serialized(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_widths() {
        assert_eq!(DatatypeTag::U8.width(), Some(1));
        assert_eq!(DatatypeTag::I16.width(), Some(2));
        assert_eq!(DatatypeTag::F32.width(), Some(4));
        assert_eq!(DatatypeTag::U64.width(), Some(8));
        assert_eq!(DatatypeTag::Serialized.width(), None);
        assert!(!DatatypeTag::Serialized.is_native());
    }

    #[test]
    fn native_tags_match_width() {
        fn check<T: Element>() {
            assert_eq!(T::TAG.width(), Some(std::mem::size_of::<T>()));
        }
        check::<f32>();
        check::<f64>();
        check::<i8>();
        check::<i16>();
        check::<i32>();
        check::<i64>();
        check::<u8>();
        check::<u16>();
        check::<u32>();
        check::<u64>();
    }

    #[test]
    fn native_encoding_is_contiguous() {
        let bytes = i32::encode(&[1, -2, 3]).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[4..8], &(-2i32).to_ne_bytes());
        assert_eq!(i32::decode(&bytes).unwrap(), vec![1, -2, 3]);
    }

    #[test]
    fn native_decode_rejects_partial_element() {
        let err = u32::decode(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn empty_payloads() {
        assert!(f64::encode(&[]).unwrap().is_empty());
        assert!(f64::decode(&[]).unwrap().is_empty());
        let bytes = String::encode(&[]).unwrap();
        assert!(String::decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn strings_and_flags() {
        let words = vec!["alpha".to_string(), String::new(), "γ".to_string()];
        let bytes = String::encode(&words).unwrap();
        assert_eq!(String::decode(&bytes).unwrap(), words);

        let flags = vec![true, false, true];
        assert_eq!(bool::decode(&bool::encode(&flags).unwrap()).unwrap(), flags);
    }

    #[test]
    fn serialized_wrapper_is_transparent() {
        let items = vec![Serialized((1u8, "a".to_string())), Serialized((2, "b".into()))];
        let bytes = Serialized::encode(&items).unwrap();
        assert_eq!(
            bytes,
            bincode::serialize(&vec![(1u8, "a".to_string()), (2u8, "b".to_string())]).unwrap()
        );
        let back = Serialized::<(u8, String)>::decode(&bytes).unwrap();
        assert_eq!(back[1].clone().into_inner(), (2, "b".to_string()));
    }

    #[test]
    fn garbage_serialized_payload_is_codec_error() {
        let err = String::decode(&[0xff; 3]).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    #[test]
    fn datatype_tag_display() {
        assert_eq!(DatatypeTag::F64.to_string(), "F64");
        assert_eq!(DatatypeTag::Serialized.to_string(), "Serialized");
    }
}
