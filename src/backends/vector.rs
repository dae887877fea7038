/// A trait for vector-like types usable as state vectors.
///
/// The simulator evaluates its right-hand side against plain `f64` slices
/// internally; this trait lets callers hand in their own vector types (a
/// `Vec`, a fixed-size array, or the feature-gated `ndarray`/`nalgebra`
/// types) without copying, as long as the data is contiguous.
///
/// # Examples
///
/// ```rust
/// use dae_sim::prelude::Vector;
///
/// // Create a zeroed state vector
/// let state: Vec<f64> = Vector::zeros(3);
/// assert_eq!(state.len(), 3);
///
/// // Access elements
/// let state = vec![1.0, 2.0, 3.0];
/// let slice = Vector::as_slice(&state);
/// assert_eq!(slice[0], 1.0);
/// ```
pub trait Vector {
    /// Borrows the contiguous data as a slice.
    fn as_slice(&self) -> &[f64];

    /// Borrows the contiguous data mutably.
    fn as_mut_slice(&mut self) -> &mut [f64];

    /// Creates a zero-filled vector of `len` elements.
    fn zeros(len: usize) -> Self;

    /// Number of elements.
    fn len(&self) -> usize;

    /// Whether the vector holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Implementation of Vector for standard `Vec<f64>`.
///
/// This is the default state-vector type: `Simulator::initial_state` and the
/// allocating `eval` produce it, and slice access is free.
impl Vector for Vec<f64> {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        vec![0.0; len]
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Implementation of Vector for ndarray's `Array1<f64>`.
///
/// Bridges ndarray's one-dimensional array type to the slice representation
/// the evaluation backends consume. Only contiguous (standard-layout) arrays
/// are produced by `zeros`, so the slice conversions cannot fail.
///
/// # Examples
///
/// ```rust
/// use dae_sim::prelude::Vector;
/// use ndarray::Array1;
///
/// let mut state = Array1::<f64>::zeros(3);
/// let slice = state.as_mut_slice();
/// slice[0] = 1.0;
/// assert_eq!(state[0], 1.0);
/// ```
#[cfg(feature = "ndarray")]
impl Vector for ndarray::Array1<f64> {
    fn as_slice(&self) -> &[f64] {
        self.as_slice().unwrap()
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self.as_slice_mut().unwrap()
    }

    fn zeros(len: usize) -> Self {
        ndarray::Array1::zeros(len)
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Implementation of Vector for nalgebra's `DVector<f64>`.
///
/// Bridges nalgebra's dynamically-sized vector type to the slice
/// representation the evaluation backends consume. `ode_solvers` state types
/// are nalgebra vectors, so this is the impl the integration demos go
/// through.
///
/// # Examples
///
/// ```rust
/// use dae_sim::prelude::Vector;
/// use nalgebra::DVector;
///
/// let mut state = DVector::<f64>::zeros(3);
/// let slice = state.as_mut_slice();
/// slice[0] = 1.0;
/// assert_eq!(state[0], 1.0);
/// ```
#[cfg(feature = "nalgebra")]
impl Vector for nalgebra::DVector<f64> {
    fn as_slice(&self) -> &[f64] {
        self.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self.as_mut_slice()
    }

    fn zeros(len: usize) -> Self {
        nalgebra::DVector::zeros(len)
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Implementation of Vector for fixed-size arrays.
///
/// Convenient for models whose state count is known at compile time, which
/// is most of the test suite.
///
/// # Examples
///
/// ```rust
/// use dae_sim::prelude::Vector;
///
/// let mut state = <[f64; 3]>::zeros(3);
/// let slice = state.as_mut_slice();
/// slice[0] = 1.0;
/// assert_eq!(state[0], 1.0);
/// ```
impl<const N: usize> Vector for [f64; N] {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        assert_eq!(len, N, "requested length does not match the array size");
        [0.0; N]
    }

    fn len(&self) -> usize {
        N
    }
}
