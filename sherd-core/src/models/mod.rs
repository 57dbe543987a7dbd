mod observation;

pub use observation::{NewObservation, Observation};
