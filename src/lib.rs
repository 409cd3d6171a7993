pub mod accumulators;
pub mod error;
pub mod estimators;
pub mod integrator;
pub mod io;
pub mod observables;
pub mod sampling;
pub mod walker;
