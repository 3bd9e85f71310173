pub mod literal;
pub mod normalizer;
pub mod parser;
pub mod plan;
pub mod tokenizer;

pub use literal::{Document, Literal, INTERNAL_ID};
pub use normalizer::normalize;
pub use parser::{parse_argument, parse_iso_datetime, parse_literal, promote_dates};
pub use plan::{build_plan, ParsedCall, QueryPlan};
pub use tokenizer::{extract_balanced, split_arguments};
