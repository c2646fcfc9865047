pub mod broadcast;
pub mod sequencer;
