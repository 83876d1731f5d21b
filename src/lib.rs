pub mod cli;
pub mod config;
pub mod consensus;
pub mod evaluator;
pub mod normalize;
pub mod overrides;
pub mod pipeline;
pub mod report;
pub mod router;
pub mod rules;
pub mod selector;
pub mod util;
