//! Keyword-driven tool prefilter. No model call involved.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use super::last_user_text;
use crate::config::HeuristicConfig;
use crate::pipeline::{PipelineRequest, PipelineStage, StageResult};

/// Intent keywords per category, matched against the lowercased user text.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("time", &["时间", "几点", "日期", "today", "date", "time", "now"]),
    ("weather", &["天气", "气温", "温度", "下雨", "降雨", "forecast", "weather"]),
    ("map", &["地图", "导航", "路线", "怎么走", "附近", "地址", "map", "route", "nearby"]),
    ("search", &["搜索", "查一下", "查找", "资料", "news", "search", "google", "bing"]),
    ("file", &["文件", "目录", "路径", "读取", "打开", "保存", "file", "path", "directory", "read", "write"]),
    ("note", &["笔记", "备忘", "记录一下", "note", "memo"]),
    ("reminder", &["提醒", "闹钟", "定时", "remind", "alarm", "schedule"]),
    ("calc", &["计算", "算一下", "calculator", "calc", "math"]),
];

/// Substrings of tool names that belong to each category.
const CATEGORY_TOOL_HINTS: &[(&str, &[&str])] = &[
    ("time", &["time", "date", "clock"]),
    ("weather", &["weather", "forecast"]),
    ("map", &["map", "geo", "route", "nearby", "amap", "gaode"]),
    ("search", &["search", "tavily", "ddg", "duck", "bing"]),
    ("file", &["file", "read", "write", "list", "path", "dir"]),
    ("note", &["note", "memo"]),
    ("reminder", &["remind", "alarm", "schedule"]),
    ("calc", &["calc", "calculator", "math"]),
];

/// Generic tools kept whenever any intent is detected.
const FALLBACK_TOOL_NAMES: &[&str] = &["calculator", "read_file", "write_file", "list_files"];

const DEFAULT_MAX_KEEP: usize = 12;

static MATH_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(\d+(?:\.\d+)?)\s*([+*/-])\s*(\d+(?:\.\d+)?)(?:\s|$)")
        .expect("math expression regex must compile")
});

/// Narrows large tool lists to the categories the last user message hints at.
///
/// Filtering only happens on a clear signal (a category keyword or a tool
/// named verbatim). Anything that would leave zero tools is dropped.
#[derive(Debug, Clone)]
pub struct ToolHeuristicPrefilterStage {
    always_include: Vec<String>,
    max_tools: Option<usize>,
    min_tools: usize,
}

impl Default for ToolHeuristicPrefilterStage {
    fn default() -> Self {
        Self::from_config(&HeuristicConfig::default())
    }
}

impl ToolHeuristicPrefilterStage {
    pub fn new(always_include: Vec<String>, max_tools: Option<usize>, min_tools: usize) -> Self {
        Self {
            always_include: always_include
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            max_tools,
            min_tools,
        }
    }

    pub fn from_config(config: &HeuristicConfig) -> Self {
        Self::new(config.always_include.clone(), config.max_tools, config.min_tools)
    }

    fn max_keep(&self) -> usize {
        self.max_tools
            .map_or(DEFAULT_MAX_KEEP, |max| max.saturating_mul(3).clamp(8, 24))
    }

    /// Candidate names in priority order, capped. Empty when no intent is seen.
    fn select(&self, user_text: &str, candidates: &[&str]) -> Vec<String> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let lower = user_text.to_lowercase();
        let scores = score_categories(user_text, &lower);

        let mentioned: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|name| {
                let name = name.to_lowercase();
                !name.is_empty() && lower.contains(&name)
            })
            .collect();

        if scores.is_empty() && mentioned.is_empty() {
            return Vec::new();
        }

        let mut selected: Vec<String> = Vec::new();

        for (category, _) in &scores {
            let hints = CATEGORY_TOOL_HINTS
                .iter()
                .find(|(name, _)| name == category)
                .map_or(&[][..], |(_, hints)| *hints);
            for name in candidates {
                let lname = name.to_lowercase();
                if hints.iter().any(|hint| lname.contains(hint)) {
                    push_unique(&mut selected, name);
                }
            }
        }
        for name in mentioned {
            push_unique(&mut selected, name);
        }
        for name in FALLBACK_TOOL_NAMES {
            if candidates.contains(name) {
                push_unique(&mut selected, name);
            }
        }

        selected.truncate(self.max_keep());
        selected
    }
}

fn push_unique(selected: &mut Vec<String>, name: &str) {
    if !selected.iter().any(|existing| existing == name) {
        selected.push(name.to_string());
    }
}

/// Category hit counts, highest first. Ties keep table order.
fn score_categories(user_text: &str, lower: &str) -> Vec<(&'static str, usize)> {
    let mut scores: Vec<(&'static str, usize)> = CATEGORY_KEYWORDS
        .iter()
        .map(|(category, keywords)| {
            let hits = keywords
                .iter()
                .filter(|keyword| lower.contains(&keyword.to_lowercase()))
                .count();
            (*category, hits)
        })
        .collect();

    if MATH_EXPR.is_match(user_text) {
        if let Some(calc) = scores.iter_mut().find(|(category, _)| *category == "calc") {
            calc.1 += 2;
        }
    }

    scores.retain(|(_, score)| *score > 0);
    scores.sort_by(|a, b| b.1.cmp(&a.1));
    scores
}

#[async_trait]
impl PipelineStage for ToolHeuristicPrefilterStage {
    fn name(&self) -> &str {
        "tool_heuristic_prefilter"
    }

    async fn pre_model(&self, request: &mut PipelineRequest) -> StageResult {
        if request.tools.is_empty() || request.tools.len() < self.min_tools {
            return Ok(());
        }
        let user_text = last_user_text(&request.messages);
        if user_text.is_empty() {
            return Ok(());
        }

        let always: HashSet<&str> = self.always_include.iter().map(String::as_str).collect();
        let candidates: Vec<&str> = request
            .tools
            .iter()
            .map(|tool| tool.name.as_str())
            .filter(|name| !always.contains(name))
            .collect();
        let selected = self.select(&user_text, &candidates);
        if selected.is_empty() {
            return Ok(());
        }

        let mut filtered = Vec::with_capacity(selected.len() + always.len());
        for name in &selected {
            if let Some(tool) = request.tools.iter().find(|tool| &tool.name == name) {
                filtered.push(tool.clone());
            }
        }
        filtered.extend(
            request
                .tools
                .iter()
                .filter(|tool| always.contains(tool.name.trim()))
                .cloned(),
        );

        if filtered.is_empty() {
            warn!("heuristic prefilter produced an empty tool list; leaving tools unfiltered");
            return Ok(());
        }
        debug!(before = request.tools.len(), after = filtered.len(), "tools prefiltered");
        request.tools = filtered;
        Ok(())
    }
}
