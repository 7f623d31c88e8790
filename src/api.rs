use base64::{engine::general_purpose, Engine as _};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT, WWW_AUTHENTICATE,
};
use reqwest::{Certificate, Client, Proxy, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Settings;
use crate::constants::{API_ERROR, AUTH_ERROR, SUCCESS};
use crate::heartbeat::Heartbeat;
use crate::ntlm::{self, NtlmError};
use crate::queue;
use crate::redact::sanitize;
use crate::session_cache::{NtlmCredentials, Session, SessionCache};
use crate::user_agent::user_agent;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid api url: {0}")]
    InvalidUrl(String),
    #[error("Invalid response body: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error("NTLM handshake failed: {0}")]
    Ntlm(#[from] NtlmError),
}

/// How one request attempt reaches the API.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyPlan {
    /// Proxy used for https requests.
    pub https_proxy: Option<String>,
    /// Credentials attached on the NTLM attempt.
    pub ntlm: Option<NtlmCredentials>,
    /// A failed attempt may be repeated once with NTLM credentials.
    pub retry_with_ntlm: bool,
}

/// Chooses the proxy setup for one attempt.
///
/// `DOMAIN\user:pass` values can't be expressed as a proxy URL, so the first
/// attempt goes out directly and only the retry carries the credentials.
pub fn proxy_plan(proxy: Option<&str>, use_ntlm: bool) -> ProxyPlan {
    match proxy {
        None => ProxyPlan {
            https_proxy: None,
            ntlm: None,
            retry_with_ntlm: false,
        },
        Some(proxy) if use_ntlm => ProxyPlan {
            https_proxy: None,
            ntlm: Some(NtlmCredentials::from_proxy(proxy)),
            retry_with_ntlm: false,
        },
        Some(proxy) if proxy.contains('\\') => ProxyPlan {
            https_proxy: None,
            ntlm: None,
            retry_with_ntlm: true,
        },
        Some(proxy) => ProxyPlan {
            https_proxy: Some(proxy.to_string()),
            ntlm: None,
            retry_with_ntlm: false,
        },
    }
}

/// Body of `GET /users/current/statusbar/today`.
#[derive(Debug, Deserialize)]
pub struct StatusBarResponse {
    pub data: StatusBarData,
}

#[derive(Debug, Deserialize)]
pub struct StatusBarData {
    pub grand_total: GrandTotal,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Deserialize)]
pub struct GrandTotal {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub text: String,
}

/// Body of `GET /users/current/goals/<id>`.
#[derive(Debug, Deserialize)]
pub struct GoalResponse {
    pub data: GoalData,
}

#[derive(Debug, Deserialize)]
pub struct GoalData {
    #[serde(default)]
    pub chart_data: Vec<GoalChartEntry>,
}

#[derive(Debug, Deserialize)]
pub struct GoalChartEntry {
    #[serde(default)]
    pub actual_seconds_text: String,
}

enum Attempt {
    Finished(i32),
    RetryWithNtlm,
}

/// Client for the bulk heartbeats endpoint.
pub struct ApiClient<'a> {
    settings: &'a Settings,
    sessions: SessionCache,
}

impl<'a> ApiClient<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            sessions: SessionCache::new(&settings.session_path),
        }
    }

    /// Sends one batch and returns the exit code for it.
    ///
    /// Heartbeats the server did not accept are pushed to the offline queue
    /// when offline mode is on. At most one NTLM retry happens per call.
    pub async fn send_heartbeats(&self, heartbeats: &[Heartbeat]) -> i32 {
        if heartbeats.is_empty() {
            return SUCCESS;
        }

        let mut use_ntlm = false;
        loop {
            match self.attempt(heartbeats, use_ntlm).await {
                Attempt::Finished(code) => return code,
                Attempt::RetryWithNtlm if !use_ntlm => {
                    tracing::debug!("Retrying with NTLM proxy credentials");
                    use_ntlm = true;
                }
                Attempt::RetryWithNtlm => return API_ERROR,
            }
        }
    }

    async fn attempt(&self, heartbeats: &[Heartbeat], use_ntlm: bool) -> Attempt {
        let plan = proxy_plan(self.settings.proxy.as_deref(), use_ntlm);
        let mut session = self.sessions.get();
        session.ntlm = plan.ntlm.clone();

        tracing::debug!(
            url = %self.settings.api_url,
            heartbeats = heartbeats.len(),
            ntlm = use_ntlm,
            "Sending heartbeats to api"
        );

        let url = match Url::parse(&self.settings.api_url) {
            Ok(url) => url,
            Err(e) => {
                let error = ApiError::InvalidUrl(format!("{} ({})", self.settings.api_url, e));
                return self.transport_failure(heartbeats, &error, &plan).await;
            }
        };

        let jar = Arc::new(Jar::default());
        if let Some(cookies) = &session.cookies {
            for cookie in cookies.split("; ").filter(|c| !c.is_empty()) {
                jar.add_cookie_str(cookie, &url);
            }
        }

        let client = match self.build_client(&plan, jar.clone()) {
            Ok(client) => client,
            Err(e) => return self.transport_failure(heartbeats, &e, &plan).await,
        };

        let payload: Vec<Heartbeat> = heartbeats
            .iter()
            .map(|h| sanitize(h, self.settings))
            .collect();

        let headers = self.headers(heartbeats);
        let response = match session.ntlm.as_ref() {
            Some(credentials) => self.post_with_ntlm(&client, &url, headers, &payload, credentials).await,
            None => post(&client, &url, headers, &payload).await,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => return self.transport_failure(heartbeats, &e, &plan).await,
        };

        let code = response.status().as_u16();
        let content = response.text().await.unwrap_or_default();

        if code == 201 || code == 202 {
            tracing::debug!(response_code = code, "Heartbeats accepted");

            for (i, (result_code, text)) in parse_results(&content)
                .into_iter()
                .enumerate()
            {
                if i >= heartbeats.len() {
                    tracing::debug!("Results from server do not match heartbeats sent.");
                    break;
                }
                self.handle_result(&heartbeats[i..=i], result_code, &text).await;
            }

            session.cookies = jar
                .cookies(&url)
                .and_then(|value| value.to_str().ok().map(str::to_string));
            self.sessions.save(&session);
            return Attempt::Finished(SUCCESS);
        }

        if plan.retry_with_ntlm && code == 400 {
            return Attempt::RetryWithNtlm;
        }

        self.handle_result(heartbeats, code, &content).await;
        self.sessions.delete();

        Attempt::Finished(if code == 401 { AUTH_ERROR } else { API_ERROR })
    }

    /// Coding time for today, or progress on `goal` when given.
    ///
    /// Returns the text to print along with the exit code.
    pub async fn today(&self, goal: Option<&str>, hide_categories: bool) -> (Option<String>, i32) {
        let base = api_base_url(&self.settings.api_url);
        let url = match goal {
            Some(goal) => format!("{}/users/current/goals/{}", base, goal.trim()),
            None => format!("{}/users/current/statusbar/today", base),
        };
        tracing::debug!(url = %url, "Fetching today's coding time");

        let plan = proxy_plan(self.settings.proxy.as_deref(), false);
        let response = match self.build_client(&plan, Arc::new(Jar::default())) {
            Ok(client) => client.get(&url).headers(self.headers(&[])).send().await.map_err(ApiError::from),
            Err(e) => Err(e),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Unable to fetch today's coding time");
                return (None, API_ERROR);
            }
        };

        let code = response.status().as_u16();
        let content = response.text().await.unwrap_or_default();
        match code {
            200 => {}
            401 => {
                tracing::error!(response_code = code, "Invalid API Key");
                return (None, AUTH_ERROR);
            }
            _ => {
                tracing::error!(response_code = code, response_content = %content, "Unable to fetch today's coding time");
                return (None, API_ERROR);
            }
        }

        let text = match goal {
            Some(_) => serde_json::from_str::<GoalResponse>(&content).map(|goal| {
                goal.data
                    .chart_data
                    .last()
                    .map(|entry| entry.actual_seconds_text.clone())
                    .unwrap_or_default()
            }),
            None => serde_json::from_str::<StatusBarResponse>(&content)
                .map(|statusbar| format_today_output(&statusbar.data, hide_categories)),
        };
        match text {
            Ok(text) => (Some(text), SUCCESS),
            Err(e) => {
                tracing::error!(error = %e, "Unable to decode today's coding time");
                (None, API_ERROR)
            }
        }
    }

    /// Negotiates, then answers the server challenge with `credentials`.
    async fn post_with_ntlm(
        &self,
        client: &Client,
        url: &Url,
        headers: HeaderMap,
        payload: &[Heartbeat],
        credentials: &NtlmCredentials,
    ) -> Result<Response, ApiError> {
        let workstation = self.machine_name().unwrap_or_default();

        let mut negotiate = headers.clone();
        insert_header(&mut negotiate, AUTHORIZATION, &ntlm::negotiate_header(&workstation)?);
        let response = post(client, url, negotiate, payload).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let token = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(ntlm::challenge_token)
            .map(str::to_string);
        let Some(token) = token else {
            tracing::debug!("No NTLM challenge in 401 response");
            return Ok(response);
        };
        // Drain the body so the challenge is answered on the same connection
        let _ = response.bytes().await;

        let mut authenticate = headers;
        insert_header(
            &mut authenticate,
            AUTHORIZATION,
            &ntlm::authenticate_header(&token, credentials, &workstation)?,
        );
        post(client, url, authenticate, payload).await
    }

    async fn transport_failure(&self, heartbeats: &[Heartbeat], error: &ApiError, plan: &ProxyPlan) -> Attempt {
        if plan.retry_with_ntlm {
            tracing::debug!(error = %error, "Request failed, will retry with NTLM");
            return Attempt::RetryWithNtlm;
        }

        if self.settings.offline {
            queue::enqueue(self.settings.queue_path.clone(), heartbeats.to_vec()).await;
            tracing::warn!(error = %error, "Unable to reach api, heartbeats saved to offline queue");
        } else {
            tracing::error!(error = %error, "Unable to reach api");
        }

        self.sessions.delete();
        Attempt::Finished(API_ERROR)
    }

    /// Deals with heartbeats the server answered with `code`.
    async fn handle_result(&self, heartbeats: &[Heartbeat], code: u16, content: &str) {
        if code == 201 || code == 202 {
            return;
        }

        if self.settings.offline && code != 400 {
            queue::enqueue(self.settings.queue_path.clone(), heartbeats.to_vec()).await;
            if code == 401 {
                tracing::error!(response_code = code, "Invalid API Key");
            } else {
                tracing::warn!(response_code = code, response_content = %content, "Heartbeats rejected, saved to offline queue");
            }
        } else {
            tracing::error!(response_code = code, response_content = %content, "Heartbeats rejected");
        }
    }

    fn build_client(&self, plan: &ProxyPlan, jar: Arc<Jar>) -> Result<Client, ApiError> {
        let mut builder = Client::builder()
            .timeout(self.settings.timeout)
            .cookie_provider(jar);

        match &self.settings.ssl_certs_file {
            Some(path) => match load_certificate(path) {
                Ok(cert) => builder = builder.add_root_certificate(cert),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unable to load ssl certs file");
                }
            },
            None if self.settings.no_ssl_verify => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            None => {}
        }

        builder = match &plan.https_proxy {
            Some(proxy) => builder.proxy(Proxy::https(proxy.as_str())?),
            None => builder.no_proxy(),
        };

        Ok(builder.build()?)
    }

    fn headers(&self, heartbeats: &[Heartbeat]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let agent = heartbeats
            .first()
            .map(|h| h.user_agent.clone())
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| user_agent(self.settings.plugin.as_deref()));
        insert_header(&mut headers, USER_AGENT, &agent);

        let auth = format!("Basic {}", general_purpose::STANDARD.encode(&self.settings.api_key));
        insert_header(&mut headers, AUTHORIZATION, &auth);

        if let Some(hostname) = self.machine_name() {
            insert_header(&mut headers, HeaderName::from_static("x-machine-name"), &hostname);
        }

        if let Some(tz) = local_timezone() {
            insert_header(&mut headers, HeaderName::from_static("timezone"), &tz);
        }

        headers
    }

    fn machine_name(&self) -> Option<String> {
        self.settings
            .hostname
            .clone()
            .or_else(|| gethostname::gethostname().into_string().ok())
            .filter(|h| !h.is_empty())
    }
}

/// Category breakdown like `1 hr 2 mins Coding, 5 mins Debugging`.
pub fn format_today_output(data: &StatusBarData, hide_categories: bool) -> String {
    let categories: Vec<String> = data
        .categories
        .iter()
        .filter(|c| !c.text.is_empty())
        .map(|c| format!("{} {}", c.text, c.name))
        .collect();

    if hide_categories || categories.is_empty() {
        data.grand_total.text.clone()
    } else {
        categories.join(", ")
    }
}

/// API root for a heartbeats url, e.g. `https://host/api/v1`.
fn api_base_url(heartbeats_url: &str) -> &str {
    match heartbeats_url.find("/users/current/") {
        Some(i) => &heartbeats_url[..i],
        None => heartbeats_url.trim_end_matches('/'),
    }
}

async fn post(client: &Client, url: &Url, headers: HeaderMap, payload: &[Heartbeat]) -> Result<Response, ApiError> {
    Ok(client.post(url.clone()).headers(headers).json(payload).send().await?)
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => tracing::debug!(header = %name, error = %e, "Skipping invalid header value"),
    }
}

fn load_certificate(path: &Path) -> anyhow::Result<Certificate> {
    let pem = std::fs::read(path)?;
    Ok(Certificate::from_pem(&pem)?)
}

/// Olson name from `TZ`, else from the `/etc/localtime` zoneinfo link.
fn local_timezone() -> Option<String> {
    if let Ok(tz) = std::env::var("TZ") {
        let tz = tz.trim().trim_start_matches(':');
        if !tz.is_empty() {
            return Some(tz.to_string());
        }
    }

    let target = std::fs::read_link("/etc/localtime").ok()?;
    let target = target.to_string_lossy();
    target
        .split_once("zoneinfo/")
        .map(|(_, tz)| tz.to_string())
        .filter(|tz| !tz.is_empty())
}

fn decode_results(content: &str) -> Result<Vec<Value>, ApiError> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(results) => Ok(results),
        Value::Object(mut body) => match body.remove("responses") {
            Some(Value::Array(results)) => Ok(results),
            _ => Ok(vec![Value::Null]),
        },
        other => Ok(vec![other]),
    }
}

/// Per-heartbeat `(status, body)` pairs from a bulk response.
///
/// The server already accepted the batch, so a body that can't be read
/// yields no results and nothing goes back to the queue.
pub fn parse_results(content: &str) -> Vec<(u16, String)> {
    let results = match decode_results(content) {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!(error = %e, "Unable to decode bulk response");
            return Vec::new();
        }
    };

    results
        .iter()
        .map(|result| {
            let code = result
                .get(1)
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(0);
            let text = result.get(0).map(Value::to_string).unwrap_or_default();
            (code, text)
        })
        .collect()
}
