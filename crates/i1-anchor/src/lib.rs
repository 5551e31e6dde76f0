//! Data model for RFC 5011 trust anchor maintenance.
//!
//! This crate provides the types shared by the autotrust engine:
//!
//! - **Records**: DNSKEY and DS rows in presentation form ([`KeyRr`]),
//!   with key tags, revoke-bit handling and DS digest matching
//! - **Keys**: [`KeyRecord`], one candidate key and its [`KeyState`]
//! - **Trust points**: [`TrustPoint`], the anchor set of one zone/class,
//!   and the trusted DS/DNSKEY sets assembled from it
//! - **Errors**: [`AnchorError`] for malformed records
//!
//! # Example
//!
//! ```rust,ignore
//! use i1_anchor::{KeyRr, ParseContext, KeyRecord, TrustPoint, AnchorId};
//!
//! let mut ctx = ParseContext::default();
//! let rr = KeyRr::parse(". 172800 IN DNSKEY 257 3 8 AwEAAa...", &mut ctx)?;
//! let mut tp = TrustPoint::new(AnchorId::new(rr.owner.clone(), rr.class));
//! tp.keys.push(KeyRecord::configured(rr));
//! tp.assemble();
//! assert!(tp.has_trust_material());
//! ```

mod error;
pub mod types;

pub use error::{AnchorError, Result};
pub use types::*;
