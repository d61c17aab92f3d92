//! # Loft Engine
//!
//! The deterministic automation core of the Loft audience-engagement SDK.
//!
//! This crate decides whether locally observed events satisfy declarative
//! rule conditions, and folds accumulating local state edits (attribute
//! and tag-group mutations) into the minimal equivalent set before any
//! network exchange.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform
//! - **Total**: predicate evaluation never fails; malformed input is a
//!   non-match, never an error
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Predicates
//!
//! A [`JsonPredicate`] is a tree of logical combinators (`and`, `or`,
//! `not`) over leaf [`JsonMatcher`]s. Each leaf resolves a key path
//! against the subject JSON and applies a [`JsonValueMatcher`]: strict
//! equality, numeric bounds, presence, a semantic-version comparator, or
//! an any-element array match.
//!
//! ### Mutations
//!
//! Local state edits are expressed as [`Mutation`]s: ordered sequences of
//! [`MutationOp`]s (`setAttribute`, `removeAttribute`, `addToGroup`,
//! `removeFromGroup`) tagged with a creation timestamp.
//!
//! ### Collapse
//!
//! [`collapse`] folds a pending [`CollapsedMutation`] and a new
//! [`Mutation`] into the fewest operations carrying the same net edit:
//! the final write per attribute name and the final membership change
//! per tag group. A remove undoes a queued add outright, while an add
//! after a queued remove survives so re-joining a group always reaches
//! the server.
//!
//! ## Quick Start
//!
//! ```rust
//! use loft_engine::{collapse, JsonPredicate, JsonValueMatcher, Mutation};
//! use serde_json::json;
//!
//! // 1. Evaluate a trigger condition against an event
//! let trigger = JsonPredicate::and(vec![
//!     JsonPredicate::matcher("status", JsonValueMatcher::Equals { expected: json!("active") }),
//!     JsonPredicate::matcher("score", JsonValueMatcher::AtLeast { min: 10.0 }),
//! ]);
//! assert!(trigger.matches(&json!({"status": "active", "score": 15})));
//!
//! // 2. Record and collapse a mutation
//! let mutation = Mutation::new(1706745600000)
//!     .set_attribute("color", json!("blue"))
//!     .set_attribute("color", json!("red"));
//! let collapsed = collapse(None, &mutation);
//! assert_eq!(collapsed.len(), 1);
//! ```
//!
//! ## Persistence and Sync
//!
//! Durable queueing, scheduling, and network delivery of collapsed
//! mutations live in the `loft-sync` crate, which consumes this one.

pub mod collapse;
pub mod error;
pub mod mutation;
pub mod predicate;
pub mod version;

// Re-export main types at crate root
pub use collapse::{collapse, CollapsedMutation};
pub use error::Error;
pub use mutation::{Mutation, MutationOp, TargetKey};
pub use predicate::{JsonMatcher, JsonPredicate, JsonValueMatcher};
pub use version::{SemanticVersion, VersionConstraint};

pub(crate) use error::Result;

/// Type aliases for clarity
pub type Identifier = String;
pub type AttributeName = String;
pub type TagGroup = String;
pub type Timestamp = u64;
pub type SequenceNumber = u64;
