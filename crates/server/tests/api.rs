use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use migration::MigratorTrait;
use sea_orm::Database;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app() -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    server::app(db)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn expense(amount_minor: i64, category: &str, date: &str) -> Value {
    json!({
        "amountMinor": amount_minor,
        "category": category,
        "date": date,
    })
}

#[tokio::test]
async fn requests_without_bearer_are_rejected() {
    let app = app().await;
    let (status, body) = call(&app, Method::GET, "/expenses", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn malformed_or_empty_bearer_is_unauthorized() {
    let app = app().await;

    let (status, body) = call(&app, Method::GET, "/expenses", Some(""), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    for value in ["Basic YWxpY2U6c2VjcmV0", "Bearer", "alice"] {
        let request = Request::builder()
            .uri("/expenses")
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{value}");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn create_with_known_local_id_returns_existing_record() {
    let app = app().await;
    let mut payload = expense(1200, "food", "2024-06-01T12:00:00Z");
    payload["localId"] = json!("offline_expense_1717243200000");

    let (status, first) = call(&app, Method::POST, "/expenses", Some("alice"), Some(payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["localId"], "offline_expense_1717243200000");

    let (status, second) = call(&app, Method::POST, "/expenses", Some("alice"), Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["data"]["_id"], first["data"]["_id"]);

    let (_, list) = call(&app, Method::GET, "/expenses", Some("alice"), None).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_payload_is_a_validation_error() {
    let app = app().await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/expenses",
        Some("alice"),
        Some(expense(0, "food", "2024-06-01T12:00:00Z")),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "amountMinor must be > 0");
}

#[tokio::test]
async fn update_and_delete_follow_the_contract() {
    let app = app().await;
    let (_, created) = call(
        &app,
        Method::POST,
        "/incomes",
        Some("alice"),
        Some(json!({"amountMinor": 5000, "source": "gift", "date": "2024-06-02T00:00:00Z"})),
    )
    .await;
    let id = created["data"]["_id"].as_str().unwrap().to_string();

    let (status, updated) = call(
        &app,
        Method::PATCH,
        &format!("/incomes/{id}"),
        Some("alice"),
        Some(json!({"amountMinor": 5500})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["amountMinor"], 5500);
    assert_eq!(updated["data"]["source"], "gift");

    let (status, _) = call(&app, Method::DELETE, &format!("/incomes/{id}"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::DELETE, &format!("/incomes/{id}"), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &app,
        Method::PATCH,
        "/incomes/missing",
        Some("alice"),
        Some(json!({"amountMinor": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owners_do_not_see_each_other() {
    let app = app().await;
    let (_, created) = call(
        &app,
        Method::POST,
        "/expenses",
        Some("alice"),
        Some(expense(100, "food", "2024-06-01T12:00:00Z")),
    )
    .await;
    let id = created["data"]["_id"].as_str().unwrap().to_string();

    let (_, list) = call(&app, Method::GET, "/expenses", Some("bob"), None).await;
    assert!(list["data"].as_array().unwrap().is_empty());

    let (status, _) = call(&app, Method::DELETE, &format!("/expenses/{id}"), Some("bob"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_and_orders_newest_first() {
    let app = app().await;
    for (amount, category, date) in [
        (100, "food", "2024-06-01T12:00:00Z"),
        (200, "rent", "2024-06-05T12:00:00Z"),
        (300, "food", "2024-06-10T12:00:00Z"),
    ] {
        call(&app, Method::POST, "/expenses", Some("alice"), Some(expense(amount, category, date))).await;
    }

    let (_, all) = call(&app, Method::GET, "/expenses", Some("alice"), None).await;
    let amounts: Vec<i64> = all["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["amountMinor"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, vec![300, 200, 100]);

    let (_, food) = call(
        &app,
        Method::GET,
        "/expenses?category=food&from=2024-06-02T00:00:00Z",
        Some("alice"),
        None,
    )
    .await;
    let food = food["data"].as_array().unwrap();
    assert_eq!(food.len(), 1);
    assert_eq!(food[0]["amountMinor"], 300);
}

fn rent_template(end_date: Option<&str>) -> Value {
    json!({
        "kind": "expense",
        "amountMinor": 90000,
        "category": "rent",
        "frequency": "monthly",
        "dayOfMonth": 31,
        "startDate": "2024-01-31",
        "endDate": end_date,
    })
}

#[tokio::test]
async fn generate_materializes_and_advances_with_clamping() {
    let app = app().await;
    let (_, created) = call(&app, Method::POST, "/recurring", Some("alice"), Some(rent_template(None))).await;
    let id = created["data"]["_id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["nextDueDate"], "2024-01-31");

    let (status, generated) = call(
        &app,
        Method::POST,
        &format!("/recurring/{id}/generate"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["data"]["transaction"]["kind"], "expense");
    assert_eq!(generated["data"]["transaction"]["category"], "rent");
    assert_eq!(generated["data"]["template"]["nextDueDate"], "2024-02-29");
    assert_eq!(generated["data"]["template"]["lastGeneratedDate"], "2024-01-31");

    let (_, generated) = call(
        &app,
        Method::POST,
        &format!("/recurring/{id}/generate"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(generated["data"]["template"]["nextDueDate"], "2024-03-31");

    let (_, expenses) = call(&app, Method::GET, "/expenses", Some("alice"), None).await;
    assert_eq!(expenses["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn process_due_catches_up_until_end_date() {
    let app = app().await;
    call(
        &app,
        Method::POST,
        "/recurring",
        Some("alice"),
        Some(rent_template(Some("2024-04-30"))),
    )
    .await;

    let (status, report) = call(&app, Method::POST, "/recurring/process-due", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let dates: Vec<&str> = report["data"]["generated"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tx| &tx["date"].as_str().unwrap()[..10])
        .collect();
    assert_eq!(dates, vec!["2024-01-31", "2024-02-29", "2024-03-31", "2024-04-30"]);
    assert_eq!(report["data"]["templates"][0]["active"], false);

    let (_, again) = call(&app, Method::POST, "/recurring/process-due", Some("alice"), None).await;
    assert!(again["data"]["generated"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn paused_template_cannot_generate() {
    let app = app().await;
    let mut template = rent_template(None);
    template["active"] = json!(false);
    let (_, created) = call(&app, Method::POST, "/recurring", Some("alice"), Some(template)).await;
    let id = created["data"]["_id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/recurring/{id}/generate"),
        Some("alice"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
