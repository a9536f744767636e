//! Reduction operations applied element-wise by `reduce`, `all_reduce` and `scan`.
//!
//! The closed set of built-in operations is [`ReduceOp`]; anything else can be
//! supplied as a pure function through [`UserOp`].
//!
//! # Example
//!
//! ```
//! use ferrogroup::{ReduceOp, Reduction, UserOp};
//!
//! assert_eq!(ReduceOp::Sum.apply(&2.0f64, &3.0), 5.0);
//! assert_eq!(ReduceOp::Max.apply(&-4i32, &1), 1);
//!
//! let longest = UserOp(|a: &String, b: &String| {
//!     if b.len() > a.len() { b.clone() } else { a.clone() }
//! });
//! assert_eq!(longest.apply(&"ab".to_string(), &"abc".to_string()), "abc");
//! ```

use crate::datatype::Arithmetic;
use crate::ReduceOp;

/// An associative binary operation over one element type.
pub trait Reduction<T> {
    /// Combine two elements. `lhs` always comes from the lower rank.
    fn apply(&self, lhs: &T, rhs: &T) -> T;

    /// Combine `rhs` into `acc` element by element.
    fn fold_into(&self, acc: &mut [T], rhs: &[T]) {
        for (a, b) in acc.iter_mut().zip(rhs) {
            *a = self.apply(a, b);
        }
    }
}

impl<T: Arithmetic> Reduction<T> for ReduceOp {
    fn apply(&self, lhs: &T, rhs: &T) -> T {
        let (a, b) = (*lhs, *rhs);
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Prod => a * b,
            ReduceOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            ReduceOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
        }
    }
}

/// A user-supplied reduction.
///
/// The function must be pure and associative; results are combined in
/// ascending rank order.
#[derive(Debug, Clone, Copy)]
pub struct UserOp<F>(pub F);

impl<T, F> Reduction<T> for UserOp<F>
where
    F: Fn(&T, &T) -> T,
{
    fn apply(&self, lhs: &T, rhs: &T) -> T {
        (self.0)(lhs, rhs)
    }
}

impl<T, R: Reduction<T> + ?Sized> Reduction<T> for &R {
    fn apply(&self, lhs: &T, rhs: &T) -> T {
        (**self).apply(lhs, rhs)
    }
}
