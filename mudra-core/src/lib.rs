pub mod classifier;
pub mod corpus;
pub mod dataset;
pub mod filter;
pub mod labels;
pub mod landmarks;
pub mod overlay;
pub mod pipeline;
pub mod recognizer;
pub mod smoothing;
pub mod split;
