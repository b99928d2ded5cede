use async_trait::async_trait;
use std::collections::BTreeMap;
use stepcore::{
    param_map, Action, ExecContext, Node, NodeError, NodeInit, ParamMap, Params, RetryPolicy,
    SharedStore, Value,
};
use stepruntime::{ConfigDefinition, NodeFactory, NodeMetadata, Runnable};

/// HTTP request node
///
/// The URL comes from the `url` parameter, falling back to the `url` config.
/// A JSON body can be read from the shared store with `body_key`. The
/// response is stored under `output_key` as `{status, body, headers}`.
///
/// Network failures and error statuses fail `exec`, so they are retried by
/// the node's retry policy.
pub struct HttpRequestNode {
    name: String,
    client: reqwest::Client,
    method: String,
    url: Option<String>,
    headers: BTreeMap<String, String>,
    body_key: Option<String>,
    output_key: String,
    retry: RetryPolicy,
}

#[async_trait]
impl Node for HttpRequestNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn prep(&self, shared: &SharedStore, params: &Params) -> Result<Value, NodeError> {
        let url = match params.get("url") {
            Some(value) => value.as_str().ok_or_else(|| NodeError::InvalidInputType {
                field: "url".to_string(),
                expected: "string".to_string(),
                actual: value.type_name().to_string(),
            })?,
            None => self
                .url
                .as_deref()
                .ok_or_else(|| NodeError::MissingParam("url".to_string()))?,
        };

        let mut request: ParamMap = param_map([("url", url)]);
        if let Some(key) = &self.body_key {
            request.insert("body".to_string(), shared.require(key)?.clone());
        }
        Ok(Value::Object(request))
    }

    async fn exec(&self, prep: &Value, ctx: &ExecContext) -> Result<Value, NodeError> {
        let url = prep
            .as_object()
            .and_then(|request| request.get("url"))
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::failed("request has no url"))?;
        let body = prep.as_object().and_then(|request| request.get("body"));

        tracing::info!(
            node = %self.name,
            attempt = ctx.current_retry,
            "{} {}",
            self.method,
            url
        );

        let mut request = match self.method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            other => return Err(NodeError::Configuration(format!("Unsupported method: {}", other))),
        };
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.json(&body.to_json());
        }

        let response = request.send().await.map_err(NodeError::compute)?;

        let status = response.status();
        let headers: BTreeMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();
        let text = response.text().await.map_err(NodeError::compute)?;

        tracing::debug!(node = %self.name, status = status.as_u16(), "response received");
        if status.is_client_error() || status.is_server_error() {
            return Err(NodeError::failed(format!("{} {} returned {}", self.method, url, status)));
        }

        // JSON bodies are stored structured, anything else as text
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from)
            .unwrap_or(Value::String(text));

        Ok(Value::Object(param_map([
            ("status", Value::from(status.as_u16() as i64)),
            ("body", body),
            ("headers", Value::Object(headers)),
        ])))
    }

    async fn post(
        &self,
        shared: &mut SharedStore,
        _params: &Params,
        _prep: Value,
        exec: Value,
    ) -> Result<Option<Action>, NodeError> {
        shared.set(self.output_key.clone(), exec);
        Ok(None)
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, init: &NodeInit<'_>) -> Result<Box<dyn Runnable>, NodeError> {
        let headers = match init.config.get("headers") {
            None => BTreeMap::new(),
            Some(Value::Object(headers)) => headers
                .iter()
                .map(|(key, value)| match value.as_str() {
                    Some(value) => Ok((key.clone(), value.to_string())),
                    None => Err(NodeError::Configuration(format!("Header '{}' must be a string", key))),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(NodeError::Configuration("Config 'headers' must be an object".to_string())),
        };

        Ok(Box::new(HttpRequestNode {
            name: init.name.to_string(),
            client: reqwest::Client::new(),
            method: init.config_str_or("method", "GET").to_uppercase(),
            url: init.config.get("url").and_then(Value::as_str).map(str::to_string),
            headers,
            body_key: init.config.get("body_key").and_then(Value::as_str).map(str::to_string),
            output_key: init.config_str_or("output_key", "response"),
            retry: init.retry,
        }))
    }

    fn node_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            config: vec![
                ConfigDefinition::optional("url", "Request URL; the url parameter takes precedence"),
                ConfigDefinition::optional("method", "GET, POST, PUT or DELETE (default: GET)"),
                ConfigDefinition::optional("headers", "Object of header names to values"),
                ConfigDefinition::optional("body_key", "Shared key holding a JSON body"),
                ConfigDefinition::optional("output_key", "Shared key for the response (default: response)"),
            ],
            actions: vec![],
        }
    }
}
