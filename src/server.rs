use crate::rag::QueryPipeline;
use crate::timing::timed_value;
use axum::extract::{Form, FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const CHAT_PAGE: &str = include_str!("../templates/chat.html");
const STYLESHEET: &str = include_str!("../static/style.css");

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    msg: String,
}

/// Routes of the chat service
pub fn router(pipeline: Arc<QueryPipeline>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/get", get(chat).post(chat))
        .route("/static/style.css", get(stylesheet))
        .fallback(not_found)
        .with_state(pipeline)
}

async fn index() -> Html<&'static str> {
    info!("Serving main chat interface");
    Html(CHAT_PAGE)
}

async fn stylesheet() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], STYLESHEET)
}

/// Answer one question as plain text
async fn chat(State(pipeline): State<Arc<QueryPipeline>>, request: Request) -> String {
    let msg = read_message(request).await;
    timed_value("chat", pipeline.answer(&msg)).await
}

/// The `msg` field of a query string, urlencoded body or multipart form.
/// Anything unreadable counts as an empty message.
async fn read_message(request: Request) -> String {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        return match Form::<ChatForm>::from_request(request, &()).await {
            Ok(Form(form)) => form.msg,
            Err(rejection) => {
                warn!("Unreadable chat form: {}", rejection);
                String::new()
            }
        };
    }

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!("Unreadable multipart form: {}", rejection);
            return String::new();
        }
    };
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("msg") => {
                return field.text().await.unwrap_or_else(|e| {
                    warn!("Unreadable msg field: {}", e);
                    String::new()
                });
            }
            Ok(Some(_)) => continue,
            Ok(None) => return String::new(),
            Err(e) => {
                warn!("Unreadable multipart form: {}", e);
                return String::new();
            }
        }
    }
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    warn!("404 error: {}", uri);
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Page not found"})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::MemoryIndex;
    use crate::database::{IndexSpec, Metric};
    use crate::embeddings::{Embedder, Embedding};
    use crate::error::Result;
    use crate::groq::Generator;
    use crate::prompt::Prompt;
    use crate::rag::{EMPTY_QUESTION_REPLY, TOO_LONG_REPLY};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Embedding> {
            Ok(Embedding {
                values: vec![1.0, 0.0],
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            Ok(vec![Embedding { values: vec![1.0, 0.0] }; texts.len()])
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &Prompt) -> Result<String> {
            Ok(format!("You asked: {}", prompt.question))
        }
    }

    async fn app() -> Router {
        let spec = IndexSpec {
            name: "medical-bot".to_string(),
            dimension: 2,
            metric: Metric::Cosine,
        };
        let pipeline = QueryPipeline::connect(
            Arc::new(FlatEmbedder),
            Arc::new(MemoryIndex::with_index(spec.clone())),
            Arc::new(EchoGenerator),
            &spec,
        )
        .await
        .unwrap();
        router(Arc::new(pipeline))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn form_post(body: String) -> Request<Body> {
        Request::post("/get")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_question_returns_plain_text() {
        let response = app()
            .await
            .oneshot(form_post("msg=What+is+asthma%3F".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(body_text(response).await, "You asked: What is asthma?");
    }

    #[tokio::test]
    async fn test_get_with_query_string() {
        let response = app()
            .await
            .oneshot(Request::get("/get?msg=hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "You asked: hello");
    }

    #[tokio::test]
    async fn test_missing_and_long_messages_get_guidance() {
        let response = app().await.oneshot(form_post(String::new())).await.unwrap();
        assert_eq!(body_text(response).await, EMPTY_QUESTION_REPLY);

        let long = format!("msg={}", "a".repeat(1001));
        let response = app().await.oneshot(form_post(long)).await.unwrap();
        assert_eq!(body_text(response).await, TOO_LONG_REPLY);
    }

    #[tokio::test]
    async fn test_post_multipart_form() {
        let body = "--XyZ\r\n\
            Content-Disposition: form-data; name=\"lang\"\r\n\r\nen\r\n\
            --XyZ\r\n\
            Content-Disposition: form-data; name=\"msg\"\r\n\r\nWhat is acne?\r\n\
            --XyZ--\r\n";
        let request = Request::post("/get")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
            .body(Body::from(body))
            .unwrap();

        let response = app().await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "You asked: What is acne?");
    }

    #[tokio::test]
    async fn test_unreadable_bodies_get_guidance() {
        let json = Request::post("/get")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"msg": "What is acne?"}"#))
            .unwrap();
        let bare = Request::post("/get")
            .body(Body::from("msg=hello"))
            .unwrap();

        for request in [json, bare] {
            let response = app().await.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, EMPTY_QUESTION_REPLY);
        }
    }

    #[tokio::test]
    async fn test_index_serves_chat_page() {
        let response = app()
            .await
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<form id=\"message-form\""));
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let response = app()
            .await
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, r#"{"error":"Page not found"}"#);
    }
}
