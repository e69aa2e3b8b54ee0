use anyhow::{anyhow, Context};
use async_trait::async_trait;
use indoc::formatdoc;
use serde_json::{json, Value};
use std::str::FromStr;
use tokio::time::Duration;

use crate::app_config::cfg;
use crate::error::AppResult;
use crate::rate_limiters::RateLimiters;
use crate::HttpClient;

use super::{
    parse_answer_field, schema, ChatApiResponseOrError, Classification, Classify, ClassifyError,
    PriorityLevel,
};

const AI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Classification oracle backed by the OpenAI chat completions API.
///
/// Performs three staged function calls per ticket: category, request type
/// scoped to that category, then priority from the impact/urgency matrix.
/// Each stage retries transient failures with capped exponential backoff
/// before surfacing a terminal error.
pub struct OpenAiClassifier {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    category_schema: Value,
    priority_schema: Value,
}

impl OpenAiClassifier {
    pub fn new(http_client: HttpClient, rate_limiters: RateLimiters) -> Self {
        Self {
            http_client,
            rate_limiters,
            category_schema: schema::category_schema(&cfg.catalog),
            priority_schema: schema::priority_schema(),
        }
    }

    async fn send_function_prompt(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        function_name: &str,
        function_description: &str,
        schema: &Value,
    ) -> AppResult<String> {
        self.rate_limiters.acquire_one().await;

        let resp = self
            .http_client
            .post(AI_ENDPOINT)
            .bearer_auth(&cfg.api_key)
            .json(&json!(
              {
                "model": &cfg.model_version,
                "messages": [
                  {
                    "role": "system",
                    "content": system_prompt
                  },
                  {
                    "role": "user",
                    "content": user_prompt
                  }
                ],
                "functions": [{
                    "name": function_name,
                    "description": function_description,
                    "parameters": schema
                }],
                "function_call": { "name": function_name }
              }
            ))
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(resp.clone())
            .context(format!("Could not parse chat response: {}", resp))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(body) => {
                if body.error.message.to_lowercase().contains("rate limit") {
                    self.rate_limiters.trigger_backoff();
                }
                return Err(anyhow!("Chat API error: {:?}", body.error).into());
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        let choice = parsed.choices.first().context("No choices in response")?;
        let call = choice
            .message
            .function_call
            .as_ref()
            .context("No function call in response")?;

        Ok(call.arguments.clone())
    }

    async fn function_prompt_with_retries(
        &self,
        operation: &'static str,
        system_prompt: &str,
        user_prompt: &str,
        function_name: &str,
        function_description: &str,
        schema: &Value,
    ) -> Result<String, ClassifyError> {
        let mut attempt = 1;
        loop {
            match self
                .send_function_prompt(
                    system_prompt,
                    user_prompt,
                    function_name,
                    function_description,
                    schema,
                )
                .await
            {
                Ok(arguments) => return Ok(arguments),
                Err(e) => {
                    if attempt >= cfg.max_retries {
                        tracing::error!("Final attempt failed for {}: {}", operation, e);
                        return Err(ClassifyError::Exhausted {
                            operation,
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let wait = Duration::from_secs(backoff_secs(attempt));
                    tracing::warn!(
                        "Retrying {} - attempt {}/{}. Error: {}. Waiting {:?}...",
                        operation,
                        attempt,
                        cfg.max_retries,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get_category(
        &self,
        title: &str,
        summary: &str,
    ) -> Result<Option<String>, ClassifyError> {
        let arguments = self
            .function_prompt_with_retries(
                "category_classification",
                CATEGORY_SYSTEM_PROMPT,
                &ticket_user_prompt(title, summary),
                "classify_category",
                "Classify a ticket into a service category",
                &self.category_schema,
            )
            .await?;

        Ok(parse_answer_field(&arguments, "category"))
    }

    async fn get_request_type(
        &self,
        title: &str,
        summary: &str,
        category: &str,
        schema: &Value,
    ) -> Result<Option<String>, ClassifyError> {
        let user_prompt = formatdoc! {r#"
            Please classify this ticket in category '{category}':
            Title: {title}
            Summary: {summary}"#};

        let arguments = self
            .function_prompt_with_retries(
                "request_type_classification",
                REQUEST_TYPE_SYSTEM_PROMPT,
                &user_prompt,
                "classify_request_type",
                "Classify a ticket into a service request type",
                schema,
            )
            .await?;

        Ok(parse_answer_field(&arguments, "request_type"))
    }

    async fn get_priority(
        &self,
        title: &str,
        summary: &str,
    ) -> Result<Option<String>, ClassifyError> {
        let arguments = self
            .function_prompt_with_retries(
                "priority_classification",
                PRIORITY_SYSTEM_PROMPT,
                &ticket_user_prompt(title, summary),
                "classify_priority",
                "Classify a ticket's priority based on impact and urgency",
                &self.priority_schema,
            )
            .await?;

        Ok(parse_answer_field(&arguments, "priority"))
    }
}

#[async_trait]
impl Classify for OpenAiClassifier {
    async fn classify(&self, title: &str, summary: &str) -> Result<Classification, ClassifyError> {
        tracing::debug!("Classifying ticket '{}'", title);

        let category = self
            .get_category(title, summary)
            .await?
            .ok_or(ClassifyError::Incomplete { stage: "category" })?;

        let request_type_schema = schema::request_type_schema(&cfg.catalog, &category);
        let request_type = self
            .get_request_type(title, summary, &category, &request_type_schema)
            .await?
            .ok_or(ClassifyError::Incomplete {
                stage: "request_type",
            })?;

        let priority_raw = self
            .get_priority(title, summary)
            .await?
            .ok_or(ClassifyError::Incomplete { stage: "priority" })?;
        let priority = PriorityLevel::from_str(&priority_raw)
            .map_err(|_| ClassifyError::Api(format!("unexpected priority level '{priority_raw}'")))?;

        tracing::debug!(
            "Classified ticket '{}': Category='{}', RequestType='{}', Priority='{}'",
            title,
            category,
            request_type,
            priority
        );

        Ok(Classification {
            category,
            request_type,
            priority,
        })
    }
}

fn ticket_user_prompt(title: &str, summary: &str) -> String {
    formatdoc! {r#"
        Please classify this ticket:
        Title: {title}
        Summary: {summary}"#}
}

const CATEGORY_SYSTEM_PROMPT: &str = "You are an expert system designed to classify support tickets into appropriate service categories. You will analyze the ticket title and summary to determine the most appropriate category. Your response must strictly conform to the provided JSON schema.";

const REQUEST_TYPE_SYSTEM_PROMPT: &str = "You are an expert system designed to classify support tickets into appropriate service request types. You will analyze the ticket title and summary to determine the most appropriate request type within the given category. Your response must strictly conform to the provided JSON schema.";

const PRIORITY_SYSTEM_PROMPT: &str = "You are an expert system designed to classify IT service tickets based on their impact and urgency levels. Analyze the ticket details and determine appropriate impact, urgency, and resulting priority levels according to the provided guidelines. Your response must strictly conform to the provided JSON schema.";

fn backoff_secs(attempt: u32) -> u64 {
    // Exponential backoff capped at 10 seconds
    (1u64 << attempt.min(6)).min(10)
}
