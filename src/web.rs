use crate::handler::process_query;
use crate::rag::QueryEngine;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7060;

const TITLE: &str = "Custom-Trained AI";
const INPUT_LABEL: &str = "Enter your text";
const INPUT_LINES: usize = 7;

/// Shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn QueryEngine>,
}

#[derive(Debug, Deserialize)]
pub struct QueryForm {
    #[serde(default)]
    pub text: String,
}

/// Body of `POST /api/predict`: one input, one output
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictPayload {
    pub data: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/api/predict", post(predict))
        .with_state(state)
}

/// Serve the form until the process is stopped
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .context("Web server stopped")?;
    Ok(())
}

pub async fn index() -> Html<String> {
    Html(render_page("", None))
}

pub async fn submit(State(state): State<AppState>, Form(form): Form<QueryForm>) -> Html<String> {
    let output = process_query(state.engine.clone(), form.text.clone()).await;
    Html(render_page(&form.text, Some(&output)))
}

pub async fn predict(
    State(state): State<AppState>,
    Json(payload): Json<PredictPayload>,
) -> Json<PredictPayload> {
    let input = payload.data.into_iter().next().unwrap_or_default();
    let output = process_query(state.engine.clone(), input).await;
    Json(PredictPayload { data: vec![output] })
}

fn render_page(input: &str, output: Option<&str>) -> String {
    let output_html = output
        .map(|o| format!("<h2>Output</h2>\n<pre>{}</pre>\n", escape_html(o)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}
textarea {{ width: 100%; }}
pre {{ white-space: pre-wrap; background: #f4f4f4; padding: 1rem; }}
</style>
</head>
<body>
<h1>{title}</h1>
<form method="post" action="/">
<label for="text">{label}</label>
<textarea id="text" name="text" rows="{rows}">{input}</textarea>
<button type="submit">Submit</button>
</form>
{output}</body>
</html>
"#,
        title = TITLE,
        label = INPUT_LABEL,
        rows = INPUT_LINES,
        input = escape_html(input),
        output = output_html,
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ERROR_MESSAGE;
    use crate::rag::QueryResponse;
    use async_trait::async_trait;

    struct EchoEngine;

    #[async_trait]
    impl QueryEngine for EchoEngine {
        async fn query(&self, query: &str) -> anyhow::Result<QueryResponse> {
            if query == "fail" {
                return Err(anyhow::anyhow!("boom"));
            }
            Ok(QueryResponse {
                response: format!("echo {}", query),
                source_nodes: Vec::new(),
            })
        }
    }

    fn state() -> AppState {
        AppState {
            engine: Arc::new(EchoEngine),
        }
    }

    #[tokio::test]
    async fn test_index_renders_form() {
        let Html(page) = index().await;
        assert!(page.contains("<title>Custom-Trained AI</title>"));
        assert!(page.contains("Enter your text"));
        assert!(page.contains(r#"rows="7""#));
        assert!(!page.contains("<h2>Output</h2>"));
    }

    #[tokio::test]
    async fn test_submit_renders_escaped_output() {
        let form = QueryForm {
            text: "<b>hi</b>".to_string(),
        };
        let Html(page) = submit(State(state()), Form(form)).await;

        assert!(page.contains("<pre>echo &lt;b&gt;hi&lt;/b&gt;\n\n</pre>"));
        assert!(page.contains("&lt;b&gt;hi&lt;/b&gt;</textarea>"));
    }

    #[tokio::test]
    async fn test_predict_returns_output() {
        let payload = PredictPayload {
            data: vec!["question".to_string()],
        };
        let Json(result) = predict(State(state()), Json(payload)).await;
        assert_eq!(result.data, vec!["echo question\n\n".to_string()]);

        let payload = PredictPayload {
            data: vec!["fail".to_string()],
        };
        let Json(result) = predict(State(state()), Json(payload)).await;
        assert_eq!(result.data, vec![ERROR_MESSAGE.to_string()]);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"a & "b" <c>"#), "a &amp; &quot;b&quot; &lt;c&gt;");
    }
}
