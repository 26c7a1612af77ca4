// data module
pub mod data {
    pub mod mass;
    pub mod spectrum;
}

// algorithm module
pub mod algorithm {
    pub mod preprocessing;
    pub mod extraction;
    pub mod statistics;
    pub mod vocabulary;
    pub mod featurization;
    pub mod utility;
}

pub mod config;
pub mod error;
pub mod io;

pub use config::FeatureConfig;
pub use error::{Ms2FeatError, Result, SpectrumError};
