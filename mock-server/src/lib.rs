use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    routing::{any, get},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
}

/// What `/api/echo` saw of the incoming request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

pub type Db = Arc<RwLock<Vec<Item>>>;

fn envelope(status: &str, message: &str, data: Value) -> Json<Value> {
    Json(json!({ "status": status, "message": message, "data": data }))
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/api/echo", any(echo))
        .route("/api/items", get(list_items).post(create_item))
        .route("/api/items/empty", get(empty_data))
        .route("/api/items/null", get(null_data))
        .route("/api/malformed", get(malformed))
        .route("/api/status/{code}", get(status_code))
        .route("/api/slow/{ms}", get(slow))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn echo(method: Method, RawQuery(query): RawQuery, headers: HeaderMap, body: String) -> Json<Value> {
    let echo = Echo {
        method: method.to_string(),
        query,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    };
    envelope("1", "ok", json!(echo))
}

async fn list_items(State(db): State<Db>) -> Json<Value> {
    let items = db.read().await;
    envelope("1", "ok", json!(*items))
}

async fn create_item(State(db): State<Db>, Form(input): Form<CreateItem>) -> Json<Value> {
    let item = Item {
        id: Uuid::new_v4(),
        name: input.name,
    };
    db.write().await.push(item.clone());
    envelope("1", "created", json!(item))
}

async fn empty_data() -> Json<Value> {
    envelope("1", "ok", json!(""))
}

async fn null_data() -> Json<Value> {
    envelope("1", "ok", Value::Null)
}

async fn malformed() -> (StatusCode, &'static str) {
    (StatusCode::OK, "<html>not an envelope</html>")
}

async fn status_code(Path(code): Path<u16>) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, envelope("0", "forced status", Value::Null))
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    envelope("1", "ok", json!({ "ms": ms }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_has_three_fields() {
        let Json(value) = envelope("1", "ok", json!([1, 2]));
        assert_eq!(value["status"], "1");
        assert_eq!(value["message"], "ok");
        assert_eq!(value["data"], json!([1, 2]));
    }

    #[test]
    fn item_roundtrips_through_json() {
        let item = Item {
            id: Uuid::new_v4(),
            name: "Roundtrip".to_string(),
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn echo_serializes_missing_query_as_null() {
        let echo = Echo {
            method: "GET".to_string(),
            query: None,
            content_type: None,
            body: String::new(),
        };
        let value = serde_json::to_value(&echo).unwrap();
        assert_eq!(value["query"], Value::Null);
        assert_eq!(value["method"], "GET");
    }
}
