//! Message filtering: normalization, term matching, and batch history fetch.

mod fetch;
mod record;
mod terms;

pub use fetch::{fetch_all, fetch_channel, sort_newest_first, FetchRequest, ScanOutcome, ScanStop};
pub use record::{iso, normalize, text_of, MessageRecord};
pub use terms::{match_terms, split_csv, TermSet};
