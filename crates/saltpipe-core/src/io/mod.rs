//! I/O primitives for bidirectional relaying.

mod relay;

pub use relay::{relay_bidirectional, RelayTotals};
