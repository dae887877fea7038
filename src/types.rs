/// Type alias for a built right-hand-side callable.
///
/// This represents a function that:
/// - Takes the current continuous-index value (e.g. time)
/// - Takes a slice of state values ordered like `diffvars`
/// - Writes one derivative per entry into the output slice, ordered like
///   `derivlist`
///
/// The callable mutates shared placeholder cells on every invocation and is
/// deliberately not `Send`: callers needing concurrent evaluation must build
/// one simulator per thread.
pub type RhsFn = Box<dyn Fn(f64, &[f64], &mut [f64])>;

/// Raw signature of a JIT-compiled combined residual function.
///
/// The first pointer is the input array `[index value, states…, live
/// scalars…]`, the second the output array receiving one derivative per
/// residual.
pub type RawRhsFn = extern "C" fn(*const f64, *mut f64);
