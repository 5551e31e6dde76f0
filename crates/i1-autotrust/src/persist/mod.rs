//! Trust anchor files.
//!
//! One file per trust point, line oriented:
//!
//! ```text
//! ; autotrust trust anchor file
//! ;;id: example.com. 1
//! ;;last_queried: 1700000000 ;;Tue Nov 14 22:13:20 2023
//! ;;last_success: 1700000000 ;;Tue Nov 14 22:13:20 2023
//! ;;next_probe_time: 1700040000 ;;Wed Nov 15 09:20:00 2023
//! ;;query_failed: 0
//! ;;query_interval: 43200
//! ;;retry_time: 8640
//! example.com. 86400 IN DNSKEY 257 3 8 AwEAAc... ;;state=2 [ VALID ] ;;count=0 ;;lastchange=1697000000 ;;Wed Oct 11 04:53:20 2023
//! ```
//!
//! Only the numeric `state`, `count` and `lastchange` fields are read back;
//! the bracketed label and the dates are regenerated on every save.

mod reader;
mod writer;

pub use reader::{load, parse};
pub use writer::{render, save, save_to};
