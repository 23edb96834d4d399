//! Conversation messages and their chat-completion wire shape.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StrandError};

/// Conversation role.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentPart>> for Content {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

/// A single part of multi-part content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>, detail: Option<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail,
            },
        }
    }

    /// Inline image bytes as a base64 `data:` URL.
    pub fn image_data(mime_type: &str, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::image_url(format!("data:{mime_type};base64,{encoded}"), None)
    }
}

/// Image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A tool invocation declared by the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Opaque serialized arguments, as produced by the model.
    pub arguments_json: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments_json: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments_json: arguments_json.into(),
        }
    }
}

/// A conversation turn.
///
/// Role and tool linkage are validated when the message is built, so an
/// existing `Message` always satisfies:
/// - `tool_call_id` is present iff the role is [`Role::Tool`]
/// - `tool_calls` is non-empty only for [`Role::Assistant`]
/// - `content` is absent only for [`Role::Assistant`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub struct Message {
    role: Role,
    content: Option<Content>,
    name: Option<String>,
    tool_call_id: Option<String>,
    tool_calls: Vec<ToolCall>,
}

#[bon::bon]
impl Message {
    /// Build a message, validating role and tool linkage.
    #[builder]
    pub fn new(
        role: Role,
        #[builder(into)] content: Option<Content>,
        #[builder(into)] name: Option<String>,
        #[builder(into)] tool_call_id: Option<String>,
        #[builder(default)] tool_calls: Vec<ToolCall>,
    ) -> Result<Self> {
        if role == Role::Tool {
            if tool_call_id.as_deref().map_or(true, str::is_empty) {
                return Err(StrandError::InvalidArgument(
                    "tool messages require a tool_call_id".into(),
                ));
            }
        } else if tool_call_id.is_some() {
            return Err(StrandError::InvalidArgument(format!(
                "{role} messages must not carry a tool_call_id"
            )));
        }
        if role != Role::Assistant && !tool_calls.is_empty() {
            return Err(StrandError::InvalidArgument(format!(
                "{role} messages must not carry tool_calls"
            )));
        }
        if role != Role::Assistant && content.is_none() {
            return Err(StrandError::InvalidArgument(format!(
                "{role} messages require content"
            )));
        }
        Ok(Self {
            role,
            content,
            name,
            tool_call_id,
            tool_calls,
        })
    }
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text.into())
    }

    pub fn developer(text: impl Into<String>) -> Self {
        Self::text_message(Role::Developer, text.into())
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text.into())
    }

    /// User message with multi-part content.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: Some(Content::Parts(parts)),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Assistant message that only carries tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls,
        }
    }

    /// Tool result linked to the call that produced it.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        Self::builder()
            .role(Role::Tool)
            .content(content.into())
            .tool_call_id(tool_call_id)
            .build()
    }

    fn text_message(role: Role, text: String) -> Self {
        Self {
            role,
            content: Some(Content::Text(text)),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the content with plain text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = Some(Content::Text(text.into()));
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Concatenated text content; empty when there is none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }

    /// Serialize to the chat-completion wire shape.
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(WireMessage::from(self.clone())).unwrap_or(Value::Null)
    }

    /// Best-effort parse of an untyped wire record.
    ///
    /// Never fails: unknown roles become `user`, a tool message without a
    /// call id becomes `assistant`, and tool calls missing an id or name are
    /// dropped.
    pub fn from_wire(value: &Value) -> Self {
        let mut role = value
            .get("role")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Role>().ok())
            .unwrap_or(Role::User);

        let mut content = match value.get("content") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(Content::Text(text.clone())),
            Some(Value::Array(items)) => Some(Content::Parts(
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect(),
            )),
            Some(other) => Some(Content::Text(other.to_string())),
        };

        let tool_call_id = match role {
            Role::Tool => {
                let id = non_empty_str(value.get("tool_call_id"));
                if id.is_none() {
                    role = Role::Assistant;
                }
                id
            }
            _ => None,
        };

        let tool_calls = if role == Role::Assistant {
            value
                .get("tool_calls")
                .and_then(Value::as_array)
                .map(|calls| calls.iter().filter_map(parse_wire_tool_call).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        if role != Role::Assistant && content.is_none() {
            content = Some(Content::Text(String::new()));
        }

        Self {
            role,
            content,
            name: non_empty_str(value.get("name")),
            tool_call_id,
            tool_calls,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_wire_tool_call(value: &Value) -> Option<ToolCall> {
    let id = non_empty_str(value.get("id"))?;
    let function = value.get("function")?;
    let name = non_empty_str(function.get("name"))?;
    let arguments_json = match function.get("arguments") {
        Some(Value::String(raw)) => raw.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };
    Some(ToolCall {
        id,
        name,
        arguments_json,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
            name: message.name,
            tool_call_id: message.tool_call_id,
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|call| WireToolCall {
                    id: call.id,
                    kind: function_type(),
                    function: WireFunction {
                        name: call.name,
                        arguments: call.arguments_json,
                    },
                })
                .collect(),
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = StrandError;

    fn try_from(wire: WireMessage) -> Result<Self> {
        Message::builder()
            .role(wire.role)
            .maybe_content(wire.content)
            .maybe_name(wire.name)
            .maybe_tool_call_id(wire.tool_call_id)
            .tool_calls(
                wire.tool_calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        name: call.function.name,
                        arguments_json: call.function.arguments,
                    })
                    .collect(),
            )
            .build()
    }
}
