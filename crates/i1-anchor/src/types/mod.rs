mod key;
mod rr;
mod state;
mod trust_point;

pub use key::*;
pub use rr::*;
pub use state::*;
pub use trust_point::*;
