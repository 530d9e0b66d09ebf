pub mod stage1_synonyms;
pub mod stage2_match;
pub mod stage3_filter;
pub mod stage4_report;

pub use stage1_synonyms::*;
pub use stage2_match::*;
pub use stage3_filter::*;
pub use stage4_report::*;
