//! Wire framing and `yrs` sync/awareness sub-protocol glue.

pub mod codec;
pub mod sync;

// vim: ts=4
