use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{InvoiceKind, InvoiceLine, InvoiceRow, RequisitionRow},
    error::ApiError,
    protocol::{
        DeleteRequest, DeleteResponse, DeleteTarget, InvoiceDetail, UpdateLinePacks,
        UpdateLinesRequest, UpdateResponse,
    },
};
use tracing::debug;

use crate::{
    cache::QueryKey,
    error::SourceError,
    source::{DataSource, UpdateRows},
};

/// [`DataSource`] backed by the stockroom HTTP API.
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    http: Client,
    server_url: String,
}

impl HttpDataSource {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self { http, server_url }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn list_invoices(&self, kind: InvoiceKind) -> Result<Vec<InvoiceRow>, SourceError> {
        let response = self
            .http
            .get(format!("{}/invoices", self.server_url))
            .query(&[("kind", kind.as_str())])
            .send()
            .await?;
        decode(response).await
    }

    pub async fn invoice_detail(
        &self,
        kind: InvoiceKind,
        invoice_number: i64,
    ) -> Result<InvoiceDetail, SourceError> {
        let response = self
            .http
            .get(format!(
                "{}/invoices/{}/{}",
                self.server_url,
                kind.as_str(),
                invoice_number
            ))
            .send()
            .await?;
        decode(response).await
    }

    pub async fn list_requisitions(&self) -> Result<Vec<RequisitionRow>, SourceError> {
        let response = self
            .http
            .get(format!("{}/requisitions", self.server_url))
            .send()
            .await?;
        decode(response).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, SourceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path, "posting to stockroom server");
        let response = self
            .http
            .post(format!("{}{}", self.server_url, path))
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    async fn delete(&self, path: &str, targets: &[DeleteTarget]) -> Result<usize, SourceError> {
        let request = DeleteRequest {
            targets: targets.to_vec(),
        };
        let response: DeleteResponse = self.post(path, &request).await?;
        Ok(response.deleted)
    }
}

/// Successful bodies decode as `T`; failures decode as [`ApiError`] when the
/// server sent one.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    match response.json::<ApiError>().await {
        Ok(error) => Err(SourceError::Api(error)),
        Err(_) => Err(SourceError::Status(status.as_u16())),
    }
}

#[async_trait]
impl DataSource<InvoiceLine> for HttpDataSource {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<InvoiceLine>, SourceError> {
        match key {
            QueryKey::InvoiceDetail {
                kind,
                invoice_number,
            } => Ok(self.invoice_detail(*kind, *invoice_number).await?.lines),
            other => Err(SourceError::UnsupportedKey(other.clone())),
        }
    }

    async fn remove(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError> {
        self.delete("/invoice-lines/delete", targets).await
    }
}

#[async_trait]
impl UpdateRows<InvoiceLine> for HttpDataSource {
    /// Sends the pack counts of stock lines. Service lines carry no packs and
    /// are skipped.
    async fn update_rows(&self, rows: &[InvoiceLine]) -> Result<usize, SourceError> {
        let lines: Vec<UpdateLinePacks> = rows
            .iter()
            .filter_map(|line| {
                line.detail
                    .number_of_packs()
                    .map(|number_of_packs| UpdateLinePacks {
                        id: line.id.clone(),
                        invoice_id: line.invoice_id.0.clone(),
                        number_of_packs,
                    })
            })
            .collect();
        let response: UpdateResponse = self
            .post("/invoice-lines/update", &UpdateLinesRequest { lines })
            .await?;
        Ok(response.updated)
    }
}

#[async_trait]
impl DataSource<InvoiceRow> for HttpDataSource {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<InvoiceRow>, SourceError> {
        match key {
            QueryKey::InvoiceList(kind) => self.list_invoices(*kind).await,
            other => Err(SourceError::UnsupportedKey(other.clone())),
        }
    }

    async fn remove(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError> {
        self.delete("/invoices/delete", targets).await
    }
}

#[async_trait]
impl DataSource<RequisitionRow> for HttpDataSource {
    async fn fetch(&self, key: &QueryKey) -> Result<Vec<RequisitionRow>, SourceError> {
        match key {
            QueryKey::RequisitionList => self.list_requisitions().await,
            other => Err(SourceError::UnsupportedKey(other.clone())),
        }
    }

    async fn remove(&self, targets: &[DeleteTarget]) -> Result<usize, SourceError> {
        self.delete("/requisitions/delete", targets).await
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
