/*!
Target-density plugins and their container.

## Overview

A sampling function represents one factor of the (possibly unnormalized)
target density. It never reports the density itself; instead it keeps
"proto-values", cached partial evaluations at the current and the proposed
position, and turns a pair of proto-value sets into an acceptance ratio.
The container multiplies the ratios of all registered factors into the
single acceptance probability used by the Metropolis criterion.

Caching the proto-values means an accepted move costs one buffer swap
instead of a re-evaluation, and the optional
[`new_proto_values`](SamplingFunction::new_proto_values) hook lets a factor
recompute only the parts affected by the dimensions that actually changed.
*/

/**
A factor of the target density, expressed through cached proto-values.

Implementations declare their input dimensionality and the number of
proto-values they cache. The engine owns registered factors outright, so
the trait is clonable through [`clone_boxed`](SamplingFunction::clone_boxed)
for callers that want to keep their own copy.

# Examples

```
use mcint::sampling::SamplingFunction;

#[derive(Clone)]
struct Gaussian {
    ndim: usize,
}

impl SamplingFunction for Gaussian {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn nproto(&self) -> usize {
        1
    }

    fn proto_values(&self, x: &[f64], proto: &mut [f64]) {
        proto[0] = x.iter().map(|v| v * v).sum();
    }

    fn acceptance(&self, proto_old: &[f64], proto_new: &[f64]) -> f64 {
        (proto_old[0] - proto_new[0]).exp()
    }

    fn clone_boxed(&self) -> Box<dyn SamplingFunction> {
        Box::new(self.clone())
    }
}

let gauss = Gaussian { ndim: 2 };
let mut proto = [0.0];
gauss.proto_values(&[1.0, 2.0], &mut proto);
assert_eq!(proto[0], 5.0);
```
*/
pub trait SamplingFunction {
    /// Input dimensionality this factor expects.
    fn ndim(&self) -> usize;

    /// Number of proto-values this factor caches.
    fn nproto(&self) -> usize;

    /// Evaluates the proto-values from scratch at position `x`.
    fn proto_values(&self, x: &[f64], proto: &mut [f64]);

    /// Evaluates the proto-values at the proposed position `xnew`.
    ///
    /// The default recomputes everything via
    /// [`proto_values`](SamplingFunction::proto_values). Implementations may
    /// instead use the `changed` mask and the previous proto-values to update
    /// only what a partial move invalidated.
    fn new_proto_values(
        &self,
        _xold: &[f64],
        xnew: &[f64],
        _changed: &[bool],
        _proto_old: &[f64],
        proto_new: &mut [f64],
    ) {
        self.proto_values(xnew, proto_new);
    }

    /// Acceptance ratio of the move described by the two proto-value sets.
    fn acceptance(&self, proto_old: &[f64], proto_new: &[f64]) -> f64;

    /// Returns an independent copy with identical configuration.
    fn clone_boxed(&self) -> Box<dyn SamplingFunction>;
}

struct SamplingEntry {
    func: Box<dyn SamplingFunction>,
    proto_old: Vec<f64>,
    proto_new: Vec<f64>,
}

/// Owns all registered density factors together with their proto-value
/// buffers and combines them into a single acceptance probability.
#[derive(Default)]
pub struct SamplingFunctionContainer {
    entries: Vec<SamplingEntry>,
}

impl SamplingFunctionContainer {
    /// Number of registered factors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no factor is registered, in which case the walk falls back
    /// to plain uniform sampling of the box.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Takes ownership of a factor and allocates its proto-value buffers.
    pub fn add_sampling_function(&mut self, func: Box<dyn SamplingFunction>) {
        let nproto = func.nproto();
        self.entries.push(SamplingEntry {
            func,
            proto_old: vec![0.0; nproto],
            proto_new: vec![0.0; nproto],
        });
    }

    /// Evaluates every factor's proto-values from scratch at `x`, filling
    /// the "old" side of the caches.
    pub fn compute_old(&mut self, x: &[f64]) {
        for entry in &mut self.entries {
            entry.func.proto_values(x, &mut entry.proto_old);
        }
    }

    /// Refreshes every factor's "new" proto-values for a proposed move.
    pub fn compute_new(&mut self, xold: &[f64], xnew: &[f64], changed: &[bool]) {
        for entry in &mut self.entries {
            let SamplingEntry {
                func,
                proto_old,
                proto_new,
            } = entry;
            func.new_proto_values(xold, xnew, changed, proto_old, proto_new);
        }
    }

    /// Product of all per-factor acceptance ratios.
    pub fn acceptance(&self) -> f64 {
        self.entries
            .iter()
            .fold(1.0, |acc, entry| {
                acc * entry.func.acceptance(&entry.proto_old, &entry.proto_new)
            })
    }

    /// Commits an accepted move by swapping each factor's proto-value
    /// buffers, making the "new" values current.
    pub fn commit(&mut self) {
        for entry in &mut self.entries {
            std::mem::swap(&mut entry.proto_old, &mut entry.proto_new);
        }
    }

    /// Drops all registered factors.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
