//! Repositories bound to a unit of work's execution context.
//!
//! Each repository is a thin, stateless wrapper: one parameterized statement
//! per operation plus a row decode. Sessions create them on first request
//! and hand out the same instance afterwards.

use std::sync::Arc;

use crate::executor::ExecutionContext;

pub mod order;
pub mod product;
pub mod user;

pub use order::OrderRepository;
pub use product::ProductRepository;
pub use user::UserRepository;

/// A repository kind a session can hand out.
pub trait Repository: Send + Sync + 'static {
    /// Build the repository on top of a session's execution context.
    fn bind(context: Arc<dyn ExecutionContext>) -> Self;
}
