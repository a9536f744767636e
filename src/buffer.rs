//! Buffer shape adapters.
//!
//! Every operation reduces its arguments to "a contiguous run of elements".
//! [`Buffer`] is the read side and [`BufferMut`] the write side; the shape of
//! the argument picks the behavior at compile time:
//!
//! | Shape                    | Read view          | Write behavior                       |
//! |--------------------------|--------------------|--------------------------------------|
//! | scalar (`f64`, `String`) | length-1 view      | holds exactly one element            |
//! | `[T]`, `[T; N]`          | pass-through view  | fixed capacity, prefix is overwritten|
//! | `Vec<T>`                 | pass-through view  | resized to the incoming length       |
//!
//! Fixed-capacity buffers reject incoming data that does not fit with
//! [`TransportError::Capacity`] before anything is written.

use crate::datatype::{Element, Serialized};
use crate::error::TransportError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A readable contiguous run of elements.
pub trait Buffer {
    /// The element type carried by the buffer.
    type Item: Element;

    /// View the buffer as a slice of elements.
    fn elements(&self) -> &[Self::Item];
}

/// A writable destination for received elements.
pub trait BufferMut: Buffer {
    /// View the buffer as a mutable slice of elements.
    fn elements_mut(&mut self) -> &mut [Self::Item];

    /// Maximum number of elements the buffer can hold, `None` if it grows
    /// on demand.
    fn fixed_len(&self) -> Option<usize> {
        Some(self.elements().len())
    }

    /// Whether `count` incoming elements can be stored.
    fn can_store(&self, count: usize) -> bool {
        self.fixed_len().map_or(true, |len| count <= len)
    }

    /// Store received elements.
    ///
    /// Fixed-size buffers overwrite their leading `items.len()` slots and leave
    /// the remainder untouched; resizable buffers take exactly `items`.
    fn store(&mut self, items: Vec<Self::Item>) -> Result<(), TransportError> {
        let slots = self.elements_mut();
        if items.len() > slots.len() {
            return Err(TransportError::Capacity {
                required: items.len(),
                available: slots.len(),
            });
        }
        for (slot, item) in slots.iter_mut().zip(items) {
            *slot = item;
        }
        Ok(())
    }
}

impl<T: Element> Buffer for [T] {
    type Item = T;

    fn elements(&self) -> &[T] {
        self
    }
}

impl<T: Element> BufferMut for [T] {
    fn elements_mut(&mut self) -> &mut [T] {
        self
    }
}

impl<T: Element, const N: usize> Buffer for [T; N] {
    type Item = T;

    fn elements(&self) -> &[T] {
        self
    }
}

impl<T: Element, const N: usize> BufferMut for [T; N] {
    fn elements_mut(&mut self) -> &mut [T] {
        self
    }
}

impl<T: Element> Buffer for Vec<T> {
    type Item = T;

    fn elements(&self) -> &[T] {
        self
    }
}

impl<T: Element> BufferMut for Vec<T> {
    fn elements_mut(&mut self) -> &mut [T] {
        self
    }

    fn fixed_len(&self) -> Option<usize> {
        None
    }

    fn store(&mut self, items: Vec<T>) -> Result<(), TransportError> {
        *self = items;
        Ok(())
    }
}

macro_rules! impl_scalar_buffer {
    ($($ty:ty),*) => {
        $(
            impl Buffer for $ty {
                type Item = $ty;

                fn elements(&self) -> &[$ty] {
                    std::slice::from_ref(self)
                }
            }

            impl BufferMut for $ty {
                fn elements_mut(&mut self) -> &mut [$ty] {
                    std::slice::from_mut(self)
                }
            }
        )*
    };
}

impl_scalar_buffer!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, String, bool, char);

impl<T> Buffer for Serialized<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    type Item = Serialized<T>;

    fn elements(&self) -> &[Serialized<T>] {
        std::slice::from_ref(self)
    }
}

impl<T> BufferMut for Serialized<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    fn elements_mut(&mut self) -> &mut [Serialized<T>] {
        std::slice::from_mut(self)
    }
}
