//! Concrete [`crate::Provider`] implementations.
//!
//! [`mock`] is a full in-memory implementation used by every other crate's
//! test suite (host/network/feature/registry) in place of a live cloud.
//! [`openstack`] is fleshed out in reasonable depth since the spec names it
//! repeatedly as the primary target; [`gcp`] and [`outscale`] are the
//! "stubs" the spec itself calls them (§1 PURPOSE & SCOPE, §4.9 DESIGN
//! NOTES) — enough to demonstrate the capability-driven branching, not a
//! full wire-protocol client, since the exact wire formats are explicitly
//! out of scope.

pub mod gcp;
pub mod mock;
pub mod openstack;
pub mod outscale;
