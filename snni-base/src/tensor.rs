//! Tensor types exchanged with the layer sequencer.
//!
//! Tensors are row-major `ndarray` arrays of rank 1 to 5, allocated and owned by
//! the caller. Large activations are handed back with [`release`] as soon as
//! the network no longer needs them.
use ndarray::{Array, Array1, Array2, Array4, Array5, Dimension};

/// One party's ring element of a secret-shared value, modulo `2^64`.
pub type Share = u64;
/// Two's-complement view of a [`Share`], used by signed local arithmetic.
pub type SignedShare = i64;
/// Publicly known integer.
pub type Public = i32;

pub type ShareVector = Array1<Share>;
pub type ShareMatrix = Array2<Share>;
/// Activations laid out as `[batch, row, col, channel]`.
pub type ShareTensor4 = Array4<Share>;
/// Volumetric activations laid out as `[batch, depth, row, col, channel]`.
pub type ShareTensor5 = Array5<Share>;

/// Frees the buffer of `tensor`, leaving an empty tensor of the same rank.
pub fn release<A, D>(tensor: &mut Array<A, D>)
where
    A: Default,
    D: Dimension,
{
    let mut empty = tensor.raw_dim();
    for axis_len in empty.slice_mut() {
        *axis_len = 0;
    }
    *tensor = Array::default(empty);
}

/// Interprets a two's-complement signed integer as a ring element.
pub fn share_from_signed(x: SignedShare) -> Share {
    x as Share
}

/// Signed view of a ring element.
pub fn share_to_signed(x: Share) -> SignedShare {
    x as SignedShare
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3, IxDyn};

    #[test]
    fn test_release() {
        let mut m: ShareMatrix = array![[1, 2], [3, 4]];
        release(&mut m);
        assert_eq!(m.shape(), &[0, 0]);
        assert!(m.is_empty());

        let mut t = Array5::<Public>::zeros((2, 1, 3, 3, 4));
        release(&mut t);
        assert_eq!(t.ndim(), 5);
        assert_eq!(t.len(), 0);

        let mut v: ShareVector = array![5, 6, 7];
        release(&mut v);
        assert_eq!(v.len(), 0);

        let mut p = Array3::<Public>::ones((2, 2, 2));
        release(&mut p);
        assert_eq!(p.shape(), &[0, 0, 0]);

        let mut d = Array::<Share, IxDyn>::zeros(IxDyn(&[3, 2]));
        release(&mut d);
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn test_signed_views() {
        assert_eq!(share_from_signed(-1), u64::MAX);
        assert_eq!(share_to_signed(u64::MAX), -1);
        assert_eq!(share_to_signed(share_from_signed(-42)), -42);
    }
}
