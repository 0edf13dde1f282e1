//! Conversions between multi-dimensional tensors and the linear buffers consumed
//! by protocol primitives.
//!
//! All conversions follow row-major (logical) order and copy values verbatim.
use crate::errors::Result;

use ndarray::{Array, ArrayBase, Data, Dimension, ShapeBuilder};

/// Copies `tensor` into a linear buffer in row-major order.
pub fn flatten<A, S, D>(tensor: &ArrayBase<S, D>) -> Vec<A>
where
    A: Clone,
    S: Data<Elem = A>,
    D: Dimension,
{
    match tensor.as_slice() {
        Some(contiguous) => contiguous.to_vec(),
        None => tensor.iter().cloned().collect(),
    }
}

/// Builds a tensor of shape `dims` from a row-major buffer.
///
/// Fails if the buffer length differs from the number of elements of `dims`.
pub fn unflatten<A, Sh, D>(buffer: Vec<A>, dims: Sh) -> Result<Array<A, D>>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    let len = buffer.len();
    Array::from_shape_vec(dims, buffer).map_err(|e| {
        precondition_error!(
            "Cannot unflatten a buffer of {} elements into the requested dimensions: {}",
            len,
            e
        )
    })
}

/// Overwrites the caller-owned `out` with the row-major contents of `buffer`.
pub fn unflatten_into<A, D>(buffer: &[A], out: &mut Array<A, D>) -> Result<()>
where
    A: Clone,
    D: Dimension,
{
    if buffer.len() != out.len() {
        return Err(precondition_error!(
            "Buffer of {} elements does not fit a tensor of shape {:?}",
            buffer.len(),
            out.shape()
        ));
    }
    for (dst, src) in out.iter_mut().zip(buffer) {
        *dst = src.clone();
    }
    Ok(())
}

/// Runs `f` on the row-major elements of `tensor`, writing any changes back.
///
/// Standard-layout tensors are handed over without copying.
pub fn with_flat_mut<A, D, T, F>(tensor: &mut Array<A, D>, f: F) -> Result<T>
where
    A: Clone,
    D: Dimension,
    F: FnOnce(&mut [A]) -> Result<T>,
{
    if let Some(contiguous) = tensor.as_slice_mut() {
        return f(contiguous);
    }
    let mut buffer = flatten(tensor);
    let result = f(&mut buffer)?;
    unflatten_into(&buffer, tensor)?;
    Ok(result)
}

/// Fails unless `tensor` has exactly the shape `expected`.
pub fn check_shape<S, D>(name: &str, tensor: &ArrayBase<S, D>, expected: &[usize]) -> Result<()>
where
    S: Data,
    D: Dimension,
{
    if tensor.shape() != expected {
        return Err(precondition_error!(
            "{} has shape {:?}, but {:?} was declared",
            name,
            tensor.shape(),
            expected
        ));
    }
    Ok(())
}
