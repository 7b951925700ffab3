pub mod composite;
pub mod ranker;

pub use composite::{combine, score_symbol, Combined};
pub use ranker::{classify, rank, rank_with};
