//! Trust operations service facade.
//!
//! [`TrustService`] composes command validation, transport negotiation, the
//! key enumeration pipeline and delegation resolution on top of the
//! repository client collaborator.

mod core;
pub(crate) mod publish;
#[cfg(test)]
pub(crate) mod test_support;

pub use self::core::*;
