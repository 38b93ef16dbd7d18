pub mod cache;
pub mod discovery;
pub mod etl;
pub mod normalize;
pub mod store;
pub mod table;

pub use crate::domain::model::{ExperimentSummary, ExperimentTable, Record, Row, TransformResult};
pub use crate::domain::ports::{ConfigProvider, DocumentSource, Pipeline, Storage};
pub use crate::utils::error::Result;
