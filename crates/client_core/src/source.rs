use async_trait::async_trait;
use shared::protocol::DeleteTarget;

use crate::{
    cache::{QueryKey, Row},
    error::SourceError,
};

/// Where cached collections come from and where removals are sent.
#[async_trait]
pub trait DataSource<R: Row>: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<R>, SourceError>;

    /// Deletes the targeted rows and reports how many were removed.
    async fn remove(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError>;
}

/// The asynchronous removal step of an optimistic delete.
#[async_trait]
pub trait RemoveRows<R: Row>: Send + Sync {
    async fn remove_rows(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError>;
}

#[async_trait]
impl<R, T> RemoveRows<R> for T
where
    R: Row,
    T: DataSource<R> + ?Sized,
{
    async fn remove_rows(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError> {
        self.remove(targets).await
    }
}

/// Persists edited rows. Returns the number of rows saved.
#[async_trait]
pub trait UpdateRows<R: Row>: Send + Sync {
    async fn update_rows(&self, rows: &[R]) -> Result<usize, SourceError>;
}
