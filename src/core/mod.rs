pub mod cmdstan;
pub mod converter;
pub mod etl;
pub mod export;
pub mod pipeline;

pub use crate::domain::model::InferenceData;
pub use crate::domain::ports::{ConfigProvider, ParsedRun, Pipeline, PredictiveSource, Storage};
pub use crate::utils::error::Result;
