use super::*;
use axum::{body, body::Body, http::Request, response::Response};
use shared::{
    domain::{InvoiceStatus, ItemId, ItemRef, LineDetail},
    protocol::DeleteTarget,
};
use tower::ServiceExt;

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let app = build_router(
        Arc::new(AppState {
            api: ApiContext {
                storage: storage.clone(),
            },
        }),
        64 * 1024,
    );
    (app, storage)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn post_json(uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

fn item(id: &str) -> ItemRef {
    ItemRef {
        id: ItemId::from(id),
        code: id.to_string(),
        name: format!("Item {id}"),
    }
}

fn stock_in() -> LineDetail {
    LineDetail::StockIn {
        batch: None,
        expiry_date: None,
        pack_size: 1,
        number_of_packs: 2.0,
        cost_price_per_pack: 1.0,
    }
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn invoice_list_and_detail_routes_work() {
    let (app, storage) = test_app().await;
    let invoice = storage
        .create_invoice(InvoiceKind::Inbound, "Central Store")
        .await
        .expect("invoice");
    storage
        .insert_line(&invoice.id, &item("a"), &stock_in())
        .await
        .expect("line");

    let list_request = Request::get("/invoices?kind=inbound")
        .body(Body::empty())
        .expect("request");
    let list_response = app.clone().oneshot(list_request).await.expect("response");
    assert_eq!(list_response.status(), StatusCode::OK);
    let invoices: Vec<InvoiceRow> = json_body(list_response).await;
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].id, invoice.id);

    let detail_request = Request::get(format!("/invoices/inbound/{}", invoice.invoice_number))
        .body(Body::empty())
        .expect("request");
    let detail_response = app.oneshot(detail_request).await.expect("response");
    assert_eq!(detail_response.status(), StatusCode::OK);
    let detail: InvoiceDetail = json_body(detail_response).await;
    assert_eq!(detail.invoice.id, invoice.id);
    assert_eq!(detail.lines.len(), 1);
}

#[tokio::test]
async fn unknown_kind_and_missing_invoice_map_to_client_errors() {
    let (app, _storage) = test_app().await;

    let bad_kind = Request::get("/invoices/sideways/1")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(bad_kind).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing = Request::get("/invoices/outbound/99")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(missing).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: ApiError = json_body(response).await;
    assert_eq!(error.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn delete_lines_route_removes_lines() {
    let (app, storage) = test_app().await;
    let invoice = storage
        .create_invoice(InvoiceKind::Inbound, "Central Store")
        .await
        .expect("invoice");
    let line = storage
        .insert_line(&invoice.id, &item("a"), &stock_in())
        .await
        .expect("line");

    let request = post_json(
        "/invoice-lines/delete",
        serde_json::json!({
            "targets": [DeleteTarget::new(line.id.0.clone(), Some(invoice.id.0.clone()))]
        }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let deleted: DeleteResponse = json_body(response).await;
    assert_eq!(deleted.deleted, 1);
    assert!(storage
        .lines_for_invoice(&invoice.id)
        .await
        .expect("lines")
        .is_empty());
}

#[tokio::test]
async fn delete_invoices_route_rejects_shipped_invoice() {
    let (app, storage) = test_app().await;
    let invoice = storage
        .create_invoice(InvoiceKind::Outbound, "Clinic")
        .await
        .expect("invoice");
    storage
        .set_invoice_status(&invoice.id, InvoiceStatus::Shipped)
        .await
        .expect("status");

    let request = post_json(
        "/invoices/delete",
        serde_json::json!({ "targets": [{ "id": invoice.id.0 }] }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_lines_route_reports_count() {
    let (app, storage) = test_app().await;
    let invoice = storage
        .create_invoice(InvoiceKind::Inbound, "Central Store")
        .await
        .expect("invoice");
    let line = storage
        .insert_line(&invoice.id, &item("a"), &stock_in())
        .await
        .expect("line");

    let request = post_json(
        "/invoice-lines/update",
        serde_json::json!({
            "lines": [{ "id": line.id.0, "invoice_id": invoice.id.0, "number_of_packs": 9.0 }]
        }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let updated: UpdateResponse = json_body(response).await;
    assert_eq!(updated.updated, 1);
}

#[tokio::test]
async fn requisition_routes_list_and_delete() {
    let (app, storage) = test_app().await;
    let requisition = storage.create_requisition("Ward A").await.expect("requisition");

    let list = Request::get("/requisitions")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(list).await.expect("response");
    let requisitions: Vec<RequisitionRow> = json_body(response).await;
    assert_eq!(requisitions.len(), 1);

    let request = post_json(
        "/requisitions/delete",
        serde_json::json!({ "targets": [{ "id": requisition.id.0 }] }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let (app, _storage) = test_app().await;
    let padding = "x".repeat(128 * 1024);
    let request = post_json(
        "/invoices/delete",
        serde_json::json!({ "targets": [{ "id": padding }] }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
