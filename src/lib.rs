//! Workspace root; everything lives in the `lib` and `permgate` members.

pub use lib::*;
