pub mod finalizer;
pub mod merger;
pub mod normalize;
pub mod utterance;

pub use finalizer::{run_finalizer, FinalizerConfig, UtteranceFinalizer};
pub use merger::{MergerConfig, UtteranceMerger};
pub use normalize::normalize_transcript;
pub use utterance::{speaker_label, Utterance};
