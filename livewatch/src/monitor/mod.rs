//! Change detection.
//!
//! Turns two consecutive snapshots of a creator into the ordered list of
//! notification-worthy events.

mod detector;

pub use detector::{Detection, HourlyCadence, detect};
