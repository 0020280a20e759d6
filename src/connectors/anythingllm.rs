use log::{error, info};
use serde_json::{json, Map, Value as Json};

use crate::{
    error::Result,
    helpers::{records_to_rows, MetadataQuery, SourceType},
    http::{HttpClient, Request},
    load::{load_rows, reconcile_columns, Stopwatch},
    wherescape::WhereScape,
};

pub const RECORD_SOURCE: &str = "AnythingLLM api - chats";
const MASK: &str = "[MASKED]";
const MASKED_COLUMNS: [&str; 3] = ["prompt", "response_text", "connection_ip"];

pub const COLUMNS: &[(&str, SourceType)] = &[
    ("id", SourceType::Int),
    ("prompt", SourceType::Text),
    ("session_id", SourceType::Text),
    ("include", SourceType::Boolean),
    ("embed_id", SourceType::Int),
    ("user_id", SourceType::Int),
    ("created_at", SourceType::DateTime),
    ("connection_host", SourceType::Text),
    ("connection_ip", SourceType::Text),
    ("connection_username", SourceType::Text),
    ("response_text", SourceType::Text),
    ("response_type", SourceType::Text),
    ("response_attachments", SourceType::Text),
    ("response_sources", SourceType::Text),
    ("response_sources_count", SourceType::Int),
    ("metrics_completion_tokens", SourceType::Int),
    ("metrics_prompt_tokens", SourceType::Int),
    ("metrics_total_tokens", SourceType::Int),
    ("metrics_output_tps", SourceType::Float),
    ("metrics_duration", SourceType::Float),
];

const DISPLAY_NAMES: [&str; 20] = [
    "ID",
    "Prompt",
    "Session ID",
    "Include",
    "Embed ID",
    "[GDPR_MEDIUM] User ID",
    "Created At",
    "Connection Host",
    "[GDPR_MEDIUM] Connection IP",
    "[GDPR_MEDIUM] Connection Username",
    "Response Text",
    "Response Type",
    "Response Attachments",
    "Response Sources",
    "Response Sources Count",
    "Metrics Completion Tokens",
    "Metrics Prompt Tokens",
    "Metrics Total Tokens",
    "Metrics Output TPS",
    "Metrics Duration",
];

const TYPES: [&str; 20] = [
    "bigint", "text", "text", "bool", "int", "int", "timestamp", "text", "text", "text", "text", "text", "text",
    "text", "int", "int", "int", "int", "numeric", "numeric",
];

/// All chats of an embed.  The embed api has no paging or date filter.
/// Failures are logged and give no chats.
pub fn get_all_embed_chats(
    client: &dyn HttpClient,
    base_url: &str,
    embed_uuid: &str,
    api_key: &str,
) -> Vec<Map<String, Json>> {
    let url = format!("{}/v1/embed/{}/chats", base_url.trim_end_matches('/'), embed_uuid);
    info!("Fetching chats from {}", url);
    let response = match client.send(&Request::get(url).bearer(api_key)) {
        Ok(response) => response,
        Err(e) => {
            error!("Error fetching chats from embed {}: {}", embed_uuid, e);
            return Vec::new();
        }
    };
    if response.status != 200 {
        error!("AnythingLLM returned status code {}", response.status);
        return Vec::new();
    }
    let chats = match response.json::<Json>() {
        Ok(body) => body["chats"].as_array().cloned().unwrap_or_default(),
        Err(e) => {
            error!("Invalid response from embed {}: {}", embed_uuid, e);
            return Vec::new();
        }
    };
    info!("Retrieved {} chats from embed {}", chats.len(), embed_uuid);
    chats.iter().map(flatten_chat).collect()
}

/// The api returns the response and the connection details as json text.
pub fn flatten_chat(chat: &Json) -> Map<String, Json> {
    let mut flat = Map::new();
    flat.insert("id".to_string(), chat["id"].clone());
    flat.insert("prompt".to_string(), chat["prompt"].clone());
    flat.insert("session_id".to_string(), chat["session_id"].clone());
    flat.insert("include".to_string(), chat["include"].clone());
    flat.insert("embed_id".to_string(), chat["embed_id"].clone());
    flat.insert("user_id".to_string(), chat["usersId"].clone());
    flat.insert("created_at".to_string(), chat["createdAt"].clone());

    let connection = parse_embedded(&chat["connection_information"]);
    for key in ["host", "ip", "username"] {
        let value = connection.as_ref().map(|c| c[key].clone()).unwrap_or(Json::Null);
        flat.insert(format!("connection_{}", key), value);
    }

    match parse_embedded(&chat["response"]) {
        Some(response) => {
            let sources = response["sources"].as_array().cloned().unwrap_or_default();
            let metrics = &response["metrics"];
            flat.insert("response_text".to_string(), response["text"].clone());
            flat.insert("response_type".to_string(), response["type"].clone());
            flat.insert(
                "response_attachments".to_string(),
                json!(response.get("attachments").cloned().unwrap_or(json!([])).to_string()),
            );
            flat.insert("response_sources".to_string(), json!(Json::Array(sources.clone()).to_string()));
            flat.insert("response_sources_count".to_string(), json!(sources.len()));
            flat.insert("metrics_completion_tokens".to_string(), metrics["completion_tokens"].clone());
            flat.insert("metrics_prompt_tokens".to_string(), metrics["prompt_tokens"].clone());
            flat.insert("metrics_total_tokens".to_string(), metrics["total_tokens"].clone());
            flat.insert("metrics_output_tps".to_string(), metrics["outputTps"].clone());
            flat.insert("metrics_duration".to_string(), metrics["duration"].clone());
        }
        None => {
            flat.insert("response_text".to_string(), chat["response"].clone());
            flat.insert("response_type".to_string(), Json::Null);
            flat.insert("response_attachments".to_string(), json!("[]"));
            flat.insert("response_sources".to_string(), json!("[]"));
            flat.insert("response_sources_count".to_string(), json!(0));
            for key in ["completion_tokens", "prompt_tokens", "total_tokens", "output_tps", "duration"] {
                flat.insert(format!("metrics_{}", key), Json::Null);
            }
        }
    }
    flat
}

/// A json object stored as a string.
fn parse_embedded(value: &Json) -> Option<Json> {
    value
        .as_str()
        .and_then(|s| serde_json::from_str::<Json>(s).ok())
        .filter(|v| v.is_object())
}

pub fn mask_chat(chat: &mut Map<String, Json>) {
    for column in MASKED_COLUMNS {
        if let Some(value) = chat.get_mut(column) {
            *value = json!(MASK);
        }
    }
}

pub fn anythingllm_load_data(ws: &mut WhereScape, client: &dyn HttpClient) -> Result<usize> {
    let stopwatch = Stopwatch::start("anythingllm_load_data");
    let context = &ws.context;
    let mut chats = get_all_embed_chats(client, &context.source_url, &context.source_user, &context.source_apikey);
    if chats.is_empty() {
        info!("No chats received from AnythingLLM");
        ws.main_message = "No chats received from AnythingLLM.".to_string();
        stopwatch.finish();
        return Ok(0);
    }

    let columns: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    let received: Vec<String> = chats[0].keys().cloned().collect();
    reconcile_columns(&received, &columns);
    chats.iter_mut().for_each(mask_chat);

    let rows = records_to_rows(&chats, COLUMNS);
    let n = load_rows(ws, &columns, rows, RECORD_SOURCE, stopwatch.started_at())?;
    info!("Successfully inserted {} rows in to the load table.", n);
    ws.main_message = format!("Successfully inserted {} rows in to the load table.", n);
    stopwatch.finish();
    Ok(n)
}

pub fn anythingllm_create_metadata(ws: &mut WhereScape) -> Result<()> {
    let key = ws.require_object_key()?;
    let embed_uuid = match ws.context.source_user.as_str() {
        "" => "unknown",
        uuid => uuid,
    };
    let columns: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    let sql = MetadataQuery::new(key, &format!("AnythingLLM embed - {}", embed_uuid))
        .columns(&columns)
        .display_names(&DISPLAY_NAMES)
        .types(&TYPES)
        .build();
    ws.push_script_to_meta(&sql)?;
    ws.main_message = format!(
        "Created {} columns in metadata table for embed {}",
        columns.len() + 2,
        embed_uuid
    );
    Ok(())
}
