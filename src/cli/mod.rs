mod command;
mod runner;
mod util;

pub use command::Command;
pub use runner::{OutputMode, run_with_format};
pub use util::{parse_fields, search_from_args};
