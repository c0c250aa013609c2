//! Resource paths: element model, name resolution and URL parsing

pub mod element;
pub mod parser;
pub mod resolver;
pub mod resource_path;

pub use element::{EntityElement, EntitySetElement, PathElement};
pub use parser::PathParser;
pub use resolver::{Binding, PropertyResolver, Resolved, Scope};
pub use resource_path::ResourcePath;
