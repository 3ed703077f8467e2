//! Streaming clients for the serving endpoints under test.
//!
//! All supported servers answer with server-sent events: one `data: {json}` event per
//! generated chunk, optionally terminated by `data: [DONE]`. Each event carrying
//! non-empty text counts as one token arrival.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Url};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::Serialize;
use serde_json::Value;

use crate::config::{ApiFormat, BenchmarkConfig};
use crate::error::{BenchError, RequestError, Result};
use crate::request::{RequestRecord, StreamTimer, TimingSample};

const ERROR_BODY_LIMIT: usize = 512;

#[derive(Serialize, Debug)]
struct CompletionsBody<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    best_of: u32,
    max_tokens: usize,
    stream: bool,
    ignore_eos: bool,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatCompletionsBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    ignore_eos: bool,
}

#[derive(Serialize, Debug)]
struct TrtLlmBody<'a> {
    accumulate_tokens: bool,
    text_input: &'a str,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
    stream: bool,
}

pub fn request_body(format: ApiFormat, model: &str, record: &RequestRecord) -> Result<Value> {
    let value = match format {
        ApiFormat::Completions => serde_json::to_value(CompletionsBody {
            model,
            prompt: &record.prompt,
            temperature: 0.0,
            best_of: 1,
            max_tokens: record.output_len,
            stream: true,
            ignore_eos: true,
        })?,
        ApiFormat::ChatCompletions => serde_json::to_value(ChatCompletionsBody {
            model,
            messages: [ChatMessage {
                role: "user",
                content: &record.prompt,
            }],
            temperature: 0.0,
            max_tokens: record.output_len,
            stream: true,
            ignore_eos: true,
        })?,
        ApiFormat::TrtLlm => serde_json::to_value(TrtLlmBody {
            accumulate_tokens: true,
            text_input: &record.prompt,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: record.output_len,
            stream: true,
        })?,
    };
    Ok(value)
}

/// Pulls the generated text out of one event payload. `Ok(None)` means the event
/// carried no text (role headers, usage records).
pub fn event_text(format: ApiFormat, data: &str) -> std::result::Result<Option<String>, RequestError> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| RequestError::Malformed(format!("{e}: {}", truncate(data))))?;

    if let Some(error) = value.get("error") {
        return Err(RequestError::Server(error.to_string()));
    }
    if value.get("object").and_then(Value::as_str) == Some("error") {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(RequestError::Server(message.to_string()));
    }

    let text = match format {
        ApiFormat::Completions => value.pointer("/choices/0/text"),
        ApiFormat::ChatCompletions => value.pointer("/choices/0/delta/content"),
        ApiFormat::TrtLlm => value.get("text_output"),
    };
    Ok(text.and_then(Value::as_str).map(str::to_string))
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= ERROR_BODY_LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(ERROR_BODY_LIMIT).collect();
        format!("{head}...")
    }
}

#[derive(Debug)]
pub struct StreamedResponse {
    pub sample: TimingSample,
    pub generated_text: String,
}

/// One shared HTTP client plus everything needed to address the endpoint.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    url: Url,
    format: ApiFormat,
    model: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &BenchmarkConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| BenchError::config(format!("invalid API key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let mut builder = Client::builder().default_headers(headers);
        if let Some(n) = config.max_concurrency {
            builder = builder.pool_max_idle_per_host(n);
        }
        Ok(Self {
            client: builder.build()?,
            url: config.api_url.clone(),
            format: config.api_format,
            model: config.model.clone(),
            timeout: config.request_timeout,
        })
    }

    /// Sends one streaming request and times every token chunk.
    pub async fn stream(
        &self,
        record: &RequestRecord,
    ) -> std::result::Result<StreamedResponse, RequestError> {
        let body = request_body(self.format, &self.model, record)
            .map_err(|e| RequestError::Transport(e.to_string()))?;
        match tokio::time::timeout(self.timeout, self.stream_body(&body)).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::Timeout(self.timeout)),
        }
    }

    async fn stream_body(
        &self,
        body: &Value,
    ) -> std::result::Result<StreamedResponse, RequestError> {
        let request = self.client.post(self.url.clone()).json(body);
        let mut timer = StreamTimer::start();
        let mut source = EventSource::new(request)
            .map_err(|e| RequestError::Transport(e.to_string()))?;

        let mut generated_text = String::new();
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data.trim() == "[DONE]" {
                        break;
                    }
                    if let Err(e) = self.accept(&message.data, &mut timer, &mut generated_text) {
                        source.close();
                        return Err(e);
                    }
                }
                // TRT-LLM closes the connection without a [DONE] sentinel.
                Err(EventSourceError::StreamEnded) => break,
                Err(e) => {
                    source.close();
                    return Err(self.stream_error(e).await);
                }
            }
        }
        source.close();

        let sample = timer.finish().ok_or(RequestError::Empty)?;
        Ok(StreamedResponse {
            sample,
            generated_text,
        })
    }

    async fn stream_error(&self, err: EventSourceError) -> RequestError {
        match err {
            EventSourceError::Transport(e) => RequestError::from_reqwest(e, self.timeout),
            EventSourceError::InvalidStatusCode(status, response) => {
                let text = response.text().await.unwrap_or_default();
                RequestError::Status {
                    status: status.as_u16(),
                    body: truncate(&text),
                }
            }
            EventSourceError::InvalidContentType(content_type, _) => RequestError::Malformed(
                format!("unexpected content type {content_type:?}"),
            ),
            EventSourceError::Utf8(e) => RequestError::Malformed(e.to_string()),
            EventSourceError::Parser(e) => RequestError::Malformed(e.to_string()),
            other => RequestError::Transport(other.to_string()),
        }
    }

    fn accept(
        &self,
        data: &str,
        timer: &mut StreamTimer,
        generated_text: &mut String,
    ) -> std::result::Result<(), RequestError> {
        if let Some(text) = event_text(self.format, data)? {
            if !text.is_empty() {
                timer.mark();
                generated_text.push_str(&text);
            }
        }
        Ok(())
    }
}
