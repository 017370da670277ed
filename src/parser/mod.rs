// Parsers for the three inputs: price-paid CSV, marker CSV and registry HTML.

pub mod markers;
pub mod transactions;
pub mod wiki_parser;

pub use markers::{load_markers, write_markers};
pub use transactions::TransactionReader;
pub use wiki_parser::{Parser, RegistryParser};
