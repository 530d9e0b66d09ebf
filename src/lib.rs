pub mod error;
pub mod io;
pub mod llm;
pub mod models;
pub mod stages;

pub use error::{PipelineError, Result};
pub use io::{read_catalog, read_dialogues, SynonymCache};
pub use llm::{ChatCompletionClient, CompletionConfig, CompletionOutcome, CompletionProvider};
pub use models::{Catalog, CandidateDetection, Dialogue, ScoredDetection, SynonymSet};
pub use stages::{
    aggregate, filter_candidates, generate_synonyms, match_synonyms, render_reports,
    FilterConfig, MatchConfig, ReportConfig, SynonymConfig,
};
