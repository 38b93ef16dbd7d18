use crate::domain::model::{Record, TransformResult};
use crate::domain::query::Query;
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 可執行讀取查詢的文件來源 (Firestore、記憶體 fixture)
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn run_query(&self, query: &Query) -> Result<Vec<Record>>;
}

#[async_trait]
impl<T: DocumentSource + ?Sized> DocumentSource for std::sync::Arc<T> {
    async fn run_query(&self, query: &Query) -> Result<Vec<Record>> {
        (**self).run_query(query).await
    }
}

pub trait ConfigProvider: Send + Sync {
    fn output_path(&self) -> &str;
    fn query_limit(&self) -> usize;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<Record>>;
    async fn transform(&self, data: Vec<Record>) -> Result<TransformResult>;
    async fn load(&self, result: TransformResult) -> Result<String>;
}
