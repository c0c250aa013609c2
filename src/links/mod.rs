//! Link construction
//!
//! Self, navigation and next links, plus custom links embedded in
//! free-form properties.

pub mod custom;
pub mod url;

pub use custom::CustomLinkExpander;
pub use url::{
    Continuation, navigation_link, next_link, parse_prefer, relative_path, self_link,
    skip_filter, split_query,
};
