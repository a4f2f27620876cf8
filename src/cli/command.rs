use std::path::PathBuf;

use crate::gateway::{ListRequest, SearchSpec, VoteRequest};
use crate::schema::DistinctField;

/// One CLI invocation, already validated into gateway types.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Collections,
    List(ListRequest),
    Count {
        collection: Option<String>,
        search: Option<SearchSpec>,
    },
    Summary {
        collection: Option<String>,
    },
    Distinct {
        field: DistinctField,
        collection: Option<String>,
    },
    Vote(VoteRequest),
    Feedback {
        contact: String,
        message: String,
    },
    // JSON array of batch entries
    Batch {
        file: PathBuf,
    },
}
