//! Completion endpoint discovery.
//!
//! Pings the configured base URL and lists the models it serves.  Ollama's
//! native `/api/tags` is tried first; any other OpenAI-compatible server is
//! asked for `/v1/models`.

use serde::Deserialize;

/// A model the completion endpoint can serve.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteModel {
    pub name: String,
}

/// Raw shape of Ollama's `/api/tags` response.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<RemoteModel>,
}

/// Raw shape of an OpenAI-style `/v1/models` response.
#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

pub(crate) fn parse_tags(raw: &str) -> Result<Vec<RemoteModel>, String> {
    serde_json::from_str::<TagsResponse>(raw)
        .map(|t| t.models)
        .map_err(|e| format!("Failed to parse model list: {}", e))
}

pub(crate) fn parse_model_list(raw: &str) -> Result<Vec<RemoteModel>, String> {
    serde_json::from_str::<ModelList>(raw)
        .map(|l| l.data.into_iter().map(|m| RemoteModel { name: m.id }).collect())
        .map_err(|e| format!("Failed to parse model list: {}", e))
}

fn get_text(url: &str, api_key: Option<&str>) -> Result<String, String> {
    let client = reqwest::blocking::Client::new();
    let mut request = client.get(url);
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .map_err(|e| format!("Completion endpoint unreachable at {}: {}", url, e))?;
    if !response.status().is_success() {
        return Err(format!("{} returned HTTP {}", url, response.status()));
    }
    response.text().map_err(|e| format!("Failed to read response from {}: {}", url, e))
}

/// Ping the completion endpoint and return the models it serves.
///
/// Returns `Err(reason)` when neither listing answers (server offline,
/// network error, etc.).
///
/// Blocking; never call from inside the Tokio runtime.
pub fn fetch_models(base_url: &str, api_key: Option<&str>) -> Result<Vec<RemoteModel>, String> {
    let base = base_url.trim_end_matches('/');
    match get_text(&format!("{}/api/tags", base), api_key).and_then(|raw| parse_tags(&raw)) {
        Ok(models) => Ok(models),
        Err(native) => get_text(&format!("{}/v1/models", base), api_key)
            .and_then(|raw| parse_model_list(&raw))
            .map_err(|compat| format!("{}; {}", native, compat)),
    }
}
