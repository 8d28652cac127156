//! Analytics module for trend analysis

pub mod trends;

pub use trends::{TrendAnalyzer, TrendConfig, TrendSource, TrendingTopic};
