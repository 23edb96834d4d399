mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{specs, tool_names, ScriptedBackend};
use strand::config::StagesConfig;
use strand::error::StrandError;
use strand::pipeline::stages::{
    standard_pipeline, ToolLlmSelectorStage, ToolSelectorState, DEFAULT_SELECTOR_PROMPT,
    TOOL_PROFILE_KEY,
};
use strand::pipeline::{PipelineRequest, PipelineStage};
use strand::provider::ChatResponse;
use strand::types::Message;

const TOOLS: &[&str] = &["search", "weather", "clock", "files"];

fn request(text: &str, tools: &[&str]) -> PipelineRequest {
    PipelineRequest {
        messages: vec![Message::system("be helpful"), Message::user(text)],
        tools: specs(tools),
        ..PipelineRequest::default()
    }
}

fn reply(text: &str) -> Result<ChatResponse, StrandError> {
    Ok(ChatResponse {
        output_text: text.to_string(),
        finish_reason: Some("stop".into()),
    })
}

fn selector(backend: &Arc<ScriptedBackend>, state: &Arc<ToolSelectorState>) -> ToolLlmSelectorStage {
    ToolLlmSelectorStage::builder()
        .backend(backend.clone())
        .state(state.clone())
        .min_tools(2)
        .always_include(vec!["clock".into()])
        .cooldown(Duration::from_secs(60))
        .build()
}

#[tokio::test]
async fn selector_filters_and_caches_across_instances() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_completion(reply(r#"Sure: {"tools": ["weather", "made_up", "weather"]}"#));
    let state = Arc::new(ToolSelectorState::new(8, None));

    let mut first = request("What's the weather?", TOOLS);
    selector(&backend, &state).pre_model(&mut first).await.unwrap();
    assert_eq!(tool_names(&first.tools), vec!["weather", "clock"]);
    assert_eq!(backend.complete_calls(), 1);

    let sent = &backend.requests()[0];
    assert_eq!(sent.temperature, Some(0.0));
    assert_eq!(sent.max_tokens, Some(256));
    assert!(sent.tools.is_empty());
    let instructions = sent.messages[0].text();
    assert!(instructions.starts_with(DEFAULT_SELECTOR_PROMPT));
    assert!(instructions.contains("Select at most 4 tools."));
    assert!(instructions.ends_with(r#"Tool names: ["search","weather","clock","files"]"#));
    assert_eq!(sent.messages[1].text(), "What's the weather?");

    let mut second = request("  what's the WEATHER?  ", TOOLS);
    selector(&backend, &state).pre_model(&mut second).await.unwrap();
    assert_eq!(tool_names(&second.tools), vec!["weather", "clock"]);
    assert_eq!(backend.complete_calls(), 1);
    assert_eq!(state.cached_selections(), 1);
}

#[tokio::test(start_paused = true)]
async fn selector_failure_trips_cooldown() {
    let backend = Arc::new(ScriptedBackend::new());
    backend
        .queue_completion(Err(StrandError::api(503, "overloaded")))
        .queue_completion(reply(r#"["search"]"#));
    let state = Arc::new(ToolSelectorState::new(8, None));
    let stage = selector(&backend, &state);

    let mut req = request("find rust news", TOOLS);
    stage.pre_model(&mut req).await.unwrap();
    assert_eq!(tool_names(&req.tools), TOOLS.to_vec());
    assert!(state.is_disabled("scripted://backend", "scripted-model"));

    let mut req = request("find rust news", TOOLS);
    stage.pre_model(&mut req).await.unwrap();
    assert_eq!(req.tools.len(), TOOLS.len());
    assert_eq!(backend.complete_calls(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;

    let mut req = request("find rust news", TOOLS);
    stage.pre_model(&mut req).await.unwrap();
    assert_eq!(tool_names(&req.tools), vec!["search", "clock"]);
    assert_eq!(backend.complete_calls(), 2);
}

#[tokio::test]
async fn selector_empty_or_unparseable_reply_keeps_tools() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_completion(reply(r#"{"tools": ["nothing_real"]}"#));
    let state = Arc::new(ToolSelectorState::new(8, None));
    let stage = ToolLlmSelectorStage::builder()
        .backend(backend.clone())
        .state(state.clone())
        .min_tools(2)
        .build();

    let mut req = request("hello", TOOLS);
    stage.pre_model(&mut req).await.unwrap();
    assert_eq!(req.tools.len(), TOOLS.len());
    assert!(state.is_disabled("scripted://backend", "scripted-model"));

    state.clear();
    backend.queue_completion(reply("I would pick the weather tool"));
    let mut req = request("something else", TOOLS);
    stage.pre_model(&mut req).await.unwrap();
    assert_eq!(req.tools.len(), TOOLS.len());
    assert!(state.is_disabled("scripted://backend", "scripted-model"));
}

#[tokio::test]
async fn selector_skips_when_last_turn_is_not_user() {
    let backend = Arc::new(ScriptedBackend::new());
    let state = Arc::new(ToolSelectorState::new(8, None));
    let mut req = request("weather?", TOOLS);
    req.messages.push(Message::assistant("checking"));

    selector(&backend, &state).pre_model(&mut req).await.unwrap();
    assert_eq!(req.tools.len(), TOOLS.len());
    assert_eq!(backend.complete_calls(), 0);
}

#[tokio::test]
async fn selector_only_sees_heuristic_survivors() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_completion(reply(r#"{"tools": ["get_weather"]}"#));

    let mut config = StagesConfig::default();
    config.heuristic.min_tools = 2;
    config.selector.enabled = true;
    config.selector.min_tools = 2;
    let pipeline = standard_pipeline(
        &config,
        Some(backend.clone()),
        Arc::new(ToolSelectorState::new(8, None)),
    )
    .unwrap();

    let tools = [
        "get_weather",
        "weather_forecast",
        "send_email",
        "play_music",
        "translate",
        "stock_quote",
    ];
    let out = pipeline
        .pre_model(request("weather in Paris?", &tools))
        .await
        .unwrap();

    assert_eq!(tool_names(&out.tools), vec!["get_weather"]);
    let instructions = backend.requests()[0].messages[0].text();
    assert!(
        instructions.ends_with(r#"Tool names: ["get_weather","weather_forecast"]"#),
        "{instructions}"
    );
}

#[tokio::test]
async fn permission_profile_from_runtime_with_downgrade() {
    let mut config = StagesConfig::default();
    config.heuristic.enabled = false;
    config
        .permission
        .profiles
        .insert("default".into(), vec!["weather".into(), "clock".into()]);
    config
        .permission
        .profiles
        .insert("locked".into(), vec!["does_not_exist".into()]);
    let pipeline = standard_pipeline(&config, None, ToolSelectorState::shared()).unwrap();

    let out = pipeline.pre_model(request("hi", TOOLS)).await.unwrap();
    assert_eq!(tool_names(&out.tools), vec!["weather", "clock"]);

    let mut locked = request("hi", TOOLS);
    locked.runtime.insert(TOOL_PROFILE_KEY.into(), json!("locked"));
    let out = pipeline.pre_model(locked).await.unwrap();
    assert_eq!(tool_names(&out.tools), TOOLS.to_vec());
}
