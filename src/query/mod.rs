//! Query construction: binders, binding sets, query state and compilation.

pub mod binder;
pub mod binding_set;
pub mod builder;
pub mod catalog;
pub mod compile;

pub use binder::{Binder, Bound};
pub use binding_set::{BindingSet, Condition, Membership, Operand, op};
pub use builder::{Query, QueryBuilder, is_select};
pub use catalog::QueryCatalog;
pub use compile::{CompiledQuery, compile};
