// Submodules for separation of concerns
mod eval;
mod exec;
mod parse;
mod path;
pub mod pipeline;
mod types;

pub use eval::{Matcher, bson_equal, compare_bson, compare_docs, compile_regex, eval_filter, project_fields};
pub use exec::{apply_update, count_docs, distinct_values, find_docs, update_one};
pub use parse::{parse_filter_json, parse_match_document};
pub use path::{resolve_values, set_path};
pub use pipeline::{Stage, parse_pipeline, run_pipeline, run_stages};
pub use types::{CmpOp, Filter, FindOptions, Order, SortSpec, UpdateDoc, UpdateReport};
