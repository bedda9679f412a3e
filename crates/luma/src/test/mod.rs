// Test module organization.
//
// The compiler is a pluggable black box, so these tests drive the VM with
// hand-assembled prototypes built through the public Instruction encoders
// (support.rs). Unit tests for leaf data structures live next to their
// modules; everything here exercises whole-interpreter behaviour.

mod support;

mod test_chunk_io;
mod test_debug;
mod test_pcall;
mod test_table;
mod test_value;
