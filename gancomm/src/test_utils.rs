/// Tensor assertions shared by the unit and integration tests
///
/// Reductions run on the backend; only the final scalar is read back for
/// the assertion itself.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};

/// Largest absolute element-wise difference
pub fn max_abs_diff<B: Backend, const D: usize>(a: &Tensor<B, D>, b: &Tensor<B, D>) -> f32 {
    (a.clone() - b.clone()).abs().max().into_scalar().elem()
}

/// Assert two tensors are approximately equal
pub fn assert_approx_eq_tensor<B: Backend, const D: usize>(
    a: &Tensor<B, D>,
    b: &Tensor<B, D>,
    epsilon: f32,
    msg: &str,
) {
    assert_eq!(a.dims(), b.dims(), "{}: shape mismatch", msg);
    let max_diff = max_abs_diff(a, b);

    assert!(
        max_diff < epsilon,
        "{}: max difference {:.6} >= epsilon {:.6}",
        msg,
        max_diff,
        epsilon
    );
}

/// Assert two tensors hold bit-identical values
pub fn assert_identical_tensor<B: Backend, const D: usize>(a: &Tensor<B, D>, b: &Tensor<B, D>, msg: &str) {
    let a: Vec<f32> = a.clone().into_data().to_vec().expect("float tensor");
    let b: Vec<f32> = b.clone().into_data().to_vec().expect("float tensor");
    let a_bits: Vec<u32> = a.into_iter().map(f32::to_bits).collect();
    let b_bits: Vec<u32> = b.into_iter().map(f32::to_bits).collect();
    assert_eq!(a_bits, b_bits, "{}", msg);
}

/// Assert a signal batch satisfies `mean(x^2) = 0.5`
pub fn assert_power_normalized<B: Backend, const D: usize>(signal: &Tensor<B, D>, epsilon: f32, msg: &str) {
    let power: f32 = signal.clone().powf_scalar(2.0).mean().into_scalar().elem();

    assert!(
        (power - 0.5).abs() < epsilon,
        "{}: mean power {:.6} not near 0.5",
        msg,
        power
    );
}
