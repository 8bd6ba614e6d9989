//! OpenAI-compatible chat completion arbiter.

use crate::arbiter::{
    Arbiter, ArbitrationError, ArbitrationRequest, ArbitrationResult, ArbitrationVerdict,
};
use crate::config::EndpointSettings;
use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 300;

const SYSTEM_PROMPT: &str = "You deduplicate news stories for a daily security digest. \
You receive one CANDIDATE story and one or more EXISTING published stories that scored as \
similar. Decide exactly one of:\n\
- NEW: the candidate is a different story; the similarity was a false positive.\n\
- DUPLICATE: the candidate reports the same story with no material new information.\n\
- MERGE: the candidate is the same story but adds material new information.\n\
Reply with one JSON object and nothing else:\n\
{\"decision\": \"NEW\" | \"DUPLICATE\" | \"MERGE\", \
\"reasoning\": \"<one or two sentences>\", \
\"target_article_id\": \"<id of the matched EXISTING story, for DUPLICATE or MERGE>\", \
\"merge\": {\"summary\": \"<what is new>\", \"content\": \"<new details to append>\", \
\"sources\": [\"<url>\"], \"severity\": \"informational|low|medium|high|critical\"}}\n\
Include `merge` only for MERGE. Omit `severity` when it does not change.";

/// Arbiter backed by a `/chat/completions` endpoint.
pub struct OpenAiArbiter {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl OpenAiArbiter {
    /// Builds the client. A missing API key is reported per call as
    /// `ArbitrationError::Unavailable`.
    pub fn from_settings(settings: &EndpointSettings) -> ArbitrationResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| ArbitrationError::Unavailable(format!("cannot build http client: {err}")))?;
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key,
            api_key_env: settings.api_key_env.clone(),
        })
    }

    fn complete(&self, api_key: &str, user_prompt: &str) -> ArbitrationResult<String> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(map_status(status, &text));
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse = response
            .json()
            .map_err(|err| ArbitrationError::Malformed(format!("invalid completion body: {err}")))?;
        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ArbitrationError::Malformed("completion returned no content".to_string()))
    }
}

impl Arbiter for OpenAiArbiter {
    fn arbitrate(&self, request: &ArbitrationRequest) -> ArbitrationResult<ArbitrationVerdict> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ArbitrationError::Unavailable(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })?;
        debug!(
            "event=arbitrate module=arbiter status=request candidate_id={} matches={} model={}",
            request.candidate_id,
            request.matches.len(),
            self.model
        );
        let content = self.complete(api_key, &user_prompt(request))?;
        ArbitrationVerdict::parse(&content, &request.offered_ids())
    }
}

fn user_prompt(request: &ArbitrationRequest) -> String {
    let mut prompt = format!(
        "CANDIDATE\nheadline: {}\nsummary: {}\nbody: {}\n",
        request.headline, request.summary, request.body
    );
    for item in &request.matches {
        prompt.push_str(&format!(
            "\nEXISTING id={} score={:.3}\nheadline: {}\nsummary: {}\nbody: {}\n",
            item.article_id, item.score, item.headline, item.summary, item.body
        ));
    }
    prompt
}

fn map_transport_error(err: reqwest::Error) -> ArbitrationError {
    if err.is_timeout() {
        ArbitrationError::Timeout
    } else {
        ArbitrationError::Transport(err.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> ArbitrationError {
    let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        ArbitrationError::RateLimited
    } else if status == StatusCode::REQUEST_TIMEOUT {
        ArbitrationError::Timeout
    } else if status.is_server_error() {
        ArbitrationError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        ArbitrationError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}
