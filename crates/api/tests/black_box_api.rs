use reqwest::StatusCode;
use serde_json::{Value, json};

use taller_api::app::{build_app, services::AppServices};
use taller_infra::ServiceConfig;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = build_app(AppServices::in_memory(ServiceConfig::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        (res.status(), res.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (res.status(), res.json().await.unwrap())
    }

    async fn create(&self, path: &str, body: Value) -> String {
        let (status, body) = self.post(path, body).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn stock(&self, item: &str, warehouse: &str) -> (i64, i64) {
        let (status, body) = self
            .get(&format!("/inventory/stock/{item}/{warehouse}"))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["data"]["quantity"].as_i64().unwrap(),
            body["data"]["reserved"].as_i64().unwrap(),
        )
    }

    async fn item(&self, code: &str) -> String {
        self.create(
            "/inventory/items",
            json!({ "code": code, "name": format!("Repuesto {code}"), "costPrice": 500 }),
        )
        .await
    }

    async fn warehouse(&self, name: &str) -> String {
        self.create(
            "/inventory/warehouses",
            json!({ "name": name, "type": "taller" }),
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let srv = TestServer::spawn().await;

    let (status, body) = srv.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = srv.get("/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn catalog_crud_and_pagination() {
    let srv = TestServer::spawn().await;

    for i in 0..25 {
        srv.item(&format!("FLT-{i:02}")).await;
    }

    let (status, body) = srv.get("/inventory/items?page=2&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 10);
    assert_eq!(body["pagination"]["total"], 25);
    assert_eq!(body["pagination"]["totalPages"], 3);
    assert_eq!(body["pagination"]["page"], 2);

    // Newest first.
    let (_, first) = srv.get("/inventory/items?limit=1").await;
    assert_eq!(first["data"][0]["code"], "FLT-24");

    let (status, body) = srv
        .post(
            "/inventory/items",
            json!({ "code": "flt-00", "name": "Duplicado" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let id = first["data"][0]["id"].as_str().unwrap().to_string();
    let res = srv
        .client
        .put(srv.url(&format!("/inventory/items/{id}")))
        .json(&json!({ "salePrice": 1200 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["salePrice"], 1200);

    let res = srv
        .client
        .delete(srv.url(&format!("/inventory/items/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["eliminado"], true);

    let (_, body) = srv.get("/inventory/items").await;
    assert_eq!(body["pagination"]["total"], 24);

    let (status, body) = srv.get("/inventory/items/not-an-id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn standalone_reservation_round_trip() {
    let srv = TestServer::spawn().await;
    let x = srv.item("X").await;
    let w = srv.warehouse("Principal").await;

    let (status, _) = srv
        .post(
            "/inventory/movements",
            json!({ "type": "entrada", "item": x, "quantity": 10, "warehouseTo": w }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, hold) = srv
        .post(
            "/inventory/reservations",
            json!({ "item": x, "warehouse": w, "quantity": 7 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(srv.stock(&x, &w).await, (10, 7));

    let (status, body) = srv
        .post(
            "/inventory/reservations",
            json!({ "item": x, "warehouse": w, "quantity": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["details"]["requested"], 5);
    assert_eq!(body["details"]["available"], 3);

    let id = hold["data"]["id"].as_str().unwrap();
    let (status, body) = srv
        .post(&format!("/inventory/reservations/{id}/release"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "liberado");
    assert_eq!(srv.stock(&x, &w).await, (10, 0));

    let (_, audit) = srv.get("/inventory/stock/audit").await;
    assert_eq!(audit["data"], json!([]));
}

#[tokio::test]
async fn purchase_receipt_is_idempotent_over_http() {
    let srv = TestServer::spawn().await;
    let x = srv.item("X").await;
    let w = srv.warehouse("Principal").await;
    let supplier = "0190c1f4-0000-7000-8000-000000000001";

    let po = srv
        .create(
            "/inventory/purchaseOrders",
            json!({
                "proveedor": { "_id": supplier, "name": "Repuestos Andinos" },
                "items": [{ "item": x, "cantidad": 20, "precioUnitario": 450 }],
            }),
        )
        .await;

    let receipt = json!({
        "warehouse": w,
        "items": [{ "item": x, "cantidad": 12 }],
        "idempotencyKey": "rcv-1",
    });
    let path = format!("/inventory/purchaseOrders/{po}/receive");
    let (status, first) = srv.post(&path, receipt.clone()).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["data"]["status"], "parcial");
    assert_eq!(first["data"]["items"][0]["recibido"], 12);
    assert_eq!(first["data"]["supplier"], supplier);

    let (status, again) = srv.post(&path, receipt).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again, first);
    assert_eq!(srv.stock(&x, &w).await, (12, 0));

    let (_, moves) = srv.get(&format!("/inventory/movements?item={x}")).await;
    assert_eq!(moves["pagination"]["total"], 1);
    assert_eq!(moves["data"][0]["type"], "entrada");

    let (status, body) = srv
        .post(
            &path,
            json!({ "warehouse": w, "items": [{ "item": x, "cantidad": 1 }], "idempotencyKey": "rcv-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = srv
        .post(&path, json!({ "warehouse": w, "items": [{ "item": x, "cantidad": 1 }] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn sales_order_confirm_ship_cancel() {
    let srv = TestServer::spawn().await;
    let a = srv.item("A").await;
    let w = srv.warehouse("Principal").await;
    srv.post(
        "/inventory/movements",
        json!({ "type": "entrada", "item": a, "quantity": 10, "warehouseTo": w }),
    )
    .await;

    let so = srv
        .create(
            "/inventory/salesOrder",
            json!({
                "cliente": "0190c1f4-0000-7000-8000-000000000002",
                "items": [{ "item": a, "cantidad": 4, "precioUnitario": 900 }],
            }),
        )
        .await;

    let (status, body) = srv
        .post(&format!("/inventory/salesOrder/{so}/submit"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pendiente");

    let (status, body) = srv
        .post(
            &format!("/inventory/salesOrder/{so}/confirm"),
            json!({ "warehouse": w, "idempotencyKey": "conf-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "confirmada");
    assert_eq!(srv.stock(&a, &w).await, (10, 4));

    // Order-owned holds are not reachable through the reservation endpoints.
    let (_, holds) = srv
        .get(&format!("/inventory/reservations?salesOrder={so}"))
        .await;
    let hold = holds["data"][0]["id"].as_str().unwrap();
    let (status, _) = srv
        .post(&format!("/inventory/reservations/{hold}/consume"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = srv
        .post(
            &format!("/inventory/salesOrder/{so}/ship"),
            json!({ "items": [{ "item": a, "cantidad": 1 }], "idempotencyKey": "ship-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "parcial");
    assert_eq!(srv.stock(&a, &w).await, (9, 3));

    let cancel = format!("/inventory/salesOrder/{so}/cancel");
    let (status, body) = srv.post(&cancel, json!({ "idempotencyKey": "x-1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelada");
    assert_eq!(srv.stock(&a, &w).await, (9, 0));

    let (status, body) = srv
        .post(
            &format!("/inventory/salesOrder/{so}/ship"),
            json!({ "idempotencyKey": "ship-2" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn confirm_without_stock_reports_details() {
    let srv = TestServer::spawn().await;
    let a = srv.item("A").await;
    let w = srv.warehouse("Principal").await;

    let so = srv
        .create(
            "/inventory/salesOrder",
            json!({
                "cliente": { "id": "0190c1f4-0000-7000-8000-000000000003" },
                "items": [{ "item": a, "cantidad": 2, "precioUnitario": 900 }],
            }),
        )
        .await;

    let (status, body) = srv
        .post(
            &format!("/inventory/salesOrder/{so}/confirm"),
            json!({ "warehouse": w, "idempotencyKey": "c" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"]["item"], a);
    assert_eq!(body["details"]["warehouse"], w);

    let (_, order) = srv.get(&format!("/inventory/salesOrder/{so}")).await;
    assert_eq!(order["data"]["status"], "borrador");
}

#[tokio::test]
async fn purchase_order_id_is_not_a_sales_order() {
    let srv = TestServer::spawn().await;
    let x = srv.item("X").await;
    let w = srv.warehouse("Principal").await;

    let po = srv
        .create(
            "/inventory/purchaseOrders",
            json!({
                "proveedor": "0190c1f4-0000-7000-8000-000000000004",
                "items": [{ "item": x, "cantidad": 3, "precioUnitario": 450 }],
            }),
        )
        .await;

    let (status, body) = srv
        .post(
            &format!("/inventory/salesOrder/{po}/confirm"),
            json!({ "warehouse": w, "idempotencyKey": "c" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    assert_eq!(body["error"], "not_found");

    let (status, _) = srv.get(&format!("/inventory/salesOrder/{po}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
