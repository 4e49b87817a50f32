//! Post-processing and persistence of measurement data.

pub mod allan;
pub mod storage;
