//! Public tensor operations, implemented as methods on [`crate::Dispatcher`].
//!
//! Each operation comes in an allocating form, which returns fresh output handles, and an
//! `_out` form, which writes into caller-supplied handles and returns them. Argument
//! positions in error messages count from the start of the `_out` signature for `_out`
//! forms.

mod cat;
mod conv2d;
mod copy;
mod lstsq;
