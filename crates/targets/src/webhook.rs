//! Generic HTTP webhook target.
//!
//! Calls the URL named in the action params, for example an ad platform's
//! campaign endpoint. Params:
//!
//! - `url` (required): target URL, `${IFTHEN_TARGET_*}` references resolved
//! - `method`: HTTP method, defaults to `POST`
//! - `header.<Name>`: extra request header, `${IFTHEN_TARGET_*}` references resolved
//! - `body`: request body; when absent the trigger is sent as JSON

use std::collections::HashMap;

use ifthen_core::TargetAgentAction;

use crate::traits::{
    target_env_var, AgentMetadata, DispatchContext, SettingDescriptor, TargetAgent, TargetError,
};

const HEADER_PREFIX: &str = "header.";

/// Delivers actions over HTTP. One shared client for connection pooling.
#[derive(Debug, Clone, Default)]
pub struct WebhookTarget {
    client: reqwest::Client,
}

impl WebhookTarget {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Request described by one webhook action, env references resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WebhookRequest {
    pub url: String,
    pub method: reqwest::Method,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl WebhookRequest {
    pub(crate) fn from_action(action: &TargetAgentAction) -> Result<Self, TargetError> {
        let url = action
            .param("url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TargetError::Invalid("webhook action has no url".to_string()))?;
        let url = resolve_env_vars(url)?;

        let method = match action.param("method") {
            Some(m) if !m.is_empty() => m
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|_| TargetError::Config(format!("invalid HTTP method: {m}")))?,
            _ => reqwest::Method::POST,
        };

        let mut headers = HashMap::new();
        for param in &action.params {
            if let Some(name) = param.key.strip_prefix(HEADER_PREFIX) {
                headers.insert(name.to_string(), resolve_env_vars(&param.value)?);
            }
        }

        Ok(Self {
            url,
            method,
            headers,
            body: action.param("body").map(str::to_string),
        })
    }
}

#[async_trait::async_trait]
impl TargetAgent for WebhookTarget {
    fn metadata(&self) -> AgentMetadata {
        AgentMetadata {
            action_type: "webhook".to_string(),
            name: "Webhook".to_string(),
            description: "Calls an HTTP endpoint with the trigger or a rendered body".to_string(),
            settings: vec![
                SettingDescriptor::required("url", "Target URL, supports ${IFTHEN_TARGET_*} references"),
                SettingDescriptor::optional("method", "HTTP method (default POST)"),
                SettingDescriptor::optional("header.<Name>", "Extra request header"),
                SettingDescriptor::optional("body", "Request body (default: trigger JSON)"),
            ],
        }
    }

    async fn process(
        &self,
        action: &TargetAgentAction,
        context: &DispatchContext,
    ) -> Result<(), TargetError> {
        let req = WebhookRequest::from_action(action)?;

        let body = match req.body {
            Some(body) => body,
            None => serde_json::to_string(&context.trigger)
                .map_err(|e| TargetError::Config(format!("failed to serialize trigger: {e}")))?,
        };

        let mut request = self
            .client
            .request(req.method.clone(), &req.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        for (key, value) in &req.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %req.url,
                %status,
                body = %body_text,
                rule_id = %context.trigger.rule_id,
                "webhook returned non-2xx status"
            );
            return Err(TargetError::Rejected {
                status: status.as_u16(),
                body: body_text,
            });
        }

        tracing::debug!(
            url = %req.url,
            method = %req.method,
            status = %status,
            rule_id = %context.trigger.rule_id,
            "webhook action delivered"
        );

        Ok(())
    }
}

/// Resolve `${VAR_NAME}` patterns in a string via [`target_env_var`].
///
/// Returns an error if a referenced variable is unset or outside the
/// `IFTHEN_TARGET_` prefix.
fn resolve_env_vars(input: &str) -> Result<String, TargetError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(TargetError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            result.push_str(&target_env_var(&var_name)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}
