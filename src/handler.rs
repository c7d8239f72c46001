use crate::rag::{QueryEngine, SOURCE_TEXT_LENGTH};
use log::{debug, error};
use std::sync::Arc;

/// Shown to the user whenever a query fails for any reason
pub const ERROR_MESSAGE: &str = "An error occurred. Please try again.";

/// Answer `input_text` with the engine, followed by the formatted sources.
///
/// Never fails: errors and panics inside the engine are logged and turned
/// into [`ERROR_MESSAGE`].
pub async fn process_query(engine: Arc<dyn QueryEngine>, input_text: String) -> String {
    debug!("Received query ({} chars)", input_text.chars().count());

    let outcome = tokio::spawn(async move { engine.query(&input_text).await }).await;

    match outcome {
        Ok(Ok(response)) => format!(
            "{}\n\n{}",
            response.response,
            response.get_formatted_sources(SOURCE_TEXT_LENGTH)
        ),
        Ok(Err(e)) => {
            error!("Error occurred: {:#}", e);
            ERROR_MESSAGE.to_string()
        }
        Err(e) => {
            error!("Error occurred: query task failed: {}", e);
            ERROR_MESSAGE.to_string()
        }
    }
}
