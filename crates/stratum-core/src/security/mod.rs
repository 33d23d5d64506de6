//! Access control for Stratum applications.
//!
//! Request-time enforcement runs in three steps:
//!
//! 1. [`SessionResolver`] turns a verified [`Identity`] into a
//!    [`SessionContext`] (`user_id`, roles, active organization).
//! 2. [`PolicyEvaluator`] decides, per table and operation, whether the
//!    session may proceed and which rows and fields it may touch.
//! 3. The record layer applies the resulting [`PolicyDecision`] to storage.
//!
//! Permission blocks are validated ahead of time by [`validate`].

pub mod context;
pub mod filter;
pub mod permission;
pub mod policy;
pub mod resolver;

pub use context::SessionContext;
pub use filter::{CompareOp, FilterError, RowFilter};
pub use permission::{validate, EffectiveRule, FieldRules, Operation, ValidatedPermissions};
pub use policy::{Access, FieldGate, PolicyDecision, PolicyEvaluator};
pub use resolver::{
    ClaimsDirectory, DirectoryError, Identity, Membership, MembershipDirectory, SessionResolver,
};
