//! Engine-computed field values and the clock they are derived from.

pub mod clock;
pub mod generator;
pub mod resolver;

pub use clock::{Clock, FixedClock, SteppingClock, SystemClock};
pub use generator::ValueGenerator;
pub use resolver::{ValueResolver, WriteKind};
