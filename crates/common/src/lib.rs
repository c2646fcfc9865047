// ensemble-common: shared types and the realtime wire protocol for the
// Ensemble workspace

pub mod protocol;
pub mod types;
