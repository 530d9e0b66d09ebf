pub mod brand;
pub mod detection;
pub mod dialogue;
pub mod metrics;
pub mod synonyms;

pub use brand::*;
pub use detection::*;
pub use dialogue::*;
pub use metrics::*;
pub use synonyms::*;
