/// External engine invocation
pub mod engine;
/// Numbered output files
pub mod output;
/// Prompt cleanup and speed labels
pub mod prompt;

pub use engine::{
    engine_args, PlaybackStatus, SynthesisError, SynthesisReport, SynthesisRequest, Synthesizer,
    SETTLE_DELAY,
};
pub use output::{next_output_ordinal, next_output_path};
pub use prompt::{describe_speed, sanitize_prompt};
