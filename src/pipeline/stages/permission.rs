//! Restricts visible tools to the active permission profile.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::pipeline::{PipelineRequest, PipelineStage, StageResult};

/// Runtime key holding the active profile name.
pub const TOOL_PROFILE_KEY: &str = "tool_profile";

/// Filters the tool list by a per-profile allow-list.
///
/// The profile comes from the runtime map under [`TOOL_PROFILE_KEY`], falling
/// back to the default profile. An allow-list that would hide every tool is
/// ignored.
#[derive(Debug, Clone)]
pub struct PermissionScopedToolsStage {
    profiles: HashMap<String, HashSet<String>>,
    default_profile: String,
}

impl PermissionScopedToolsStage {
    pub fn new<P, K, T, N>(profiles: P, default_profile: impl Into<String>) -> Self
    where
        P: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let default_profile = match default_profile.into().trim() {
            "" => "default".to_string(),
            name => name.to_string(),
        };
        let mut normalized = HashMap::new();
        for (profile, tools) in profiles {
            let allowed: HashSet<String> = tools
                .into_iter()
                .map(|name| name.into().trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
            if allowed.is_empty() {
                continue;
            }
            let profile = match profile.into().trim() {
                "" => default_profile.clone(),
                name => name.to_string(),
            };
            normalized.insert(profile, allowed);
        }
        Self {
            profiles: normalized,
            default_profile,
        }
    }

    fn resolve_profile<'a>(&'a self, request: &'a PipelineRequest) -> &'a str {
        request
            .runtime
            .get(TOOL_PROFILE_KEY)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.default_profile)
    }
}

#[async_trait]
impl PipelineStage for PermissionScopedToolsStage {
    fn name(&self) -> &str {
        "permission_scoped_tools"
    }

    async fn pre_model(&self, request: &mut PipelineRequest) -> StageResult {
        if self.profiles.is_empty() || request.tools.is_empty() {
            return Ok(());
        }
        let profile = self.resolve_profile(request).to_string();
        let Some(allowed) = self
            .profiles
            .get(&profile)
            .or_else(|| self.profiles.get(&self.default_profile))
        else {
            return Ok(());
        };

        let filtered: Vec<_> = request
            .tools
            .iter()
            .filter(|tool| allowed.contains(tool.name.trim()))
            .cloned()
            .collect();

        if filtered.is_empty() {
            warn!(%profile, "permission profile allows none of the available tools; leaving tools unfiltered");
            return Ok(());
        }
        debug!(%profile, before = request.tools.len(), after = filtered.len(), "tools scoped by permission profile");
        request.tools = filtered;
        Ok(())
    }
}
