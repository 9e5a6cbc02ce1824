pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{cli::LocalStorage, CliConfig};

pub use config::ConversionJob;
pub use core::{converter::CmdStanConverter, etl::ConversionEngine, pipeline::CmdStanPipeline};
pub use domain::model::InferenceData;
pub use utils::error::{ConvertError, Result};
