//! CRUD operation core: list query assembly, search, validation and the resource itself.

mod crud;
pub mod query;
pub mod search;
mod validation;

pub use crud::Resource;
pub use query::{force_owner, ListQuery, SortSpec};
pub use search::{convert_search_to_conditions, merge_or_clause, SearchOptions, SearchType};
pub use validation::RequestValidator;
