use serde::Deserialize;

/// One line of the agent's `--json` event stream. Only the fields we act on
/// are modelled; everything else decodes to [`AgentEvent::Other`].
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "item.completed")]
    ItemCompleted { item: AgentItem },
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentItem {
    Reasoning {
        #[serde(default)]
        text: String,
    },
    AgentMessage {
        #[serde(default)]
        text: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    CommandExecution {
        #[serde(default)]
        aggregated_output: String,
        #[serde(default)]
        status: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Reasoning,
    Message,
    Command,
    Error,
}

impl OutputCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputCategory::Reasoning => "reasoning",
            OutputCategory::Message => "message",
            OutputCategory::Command => "command",
            OutputCategory::Error => "error",
        }
    }
}

/// A classified event, ready to be stored as an output record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub category: OutputCategory,
    pub content: String,
}

/// Decodes one raw line. Lines that are not JSON events yield `None`.
pub fn parse_line(line: &str) -> Option<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Maps an event to its output record, if it produces one.
pub fn classify(event: &AgentEvent) -> Option<Classified> {
    let AgentEvent::ItemCompleted { item } = event else {
        return None;
    };
    let (category, content) = match item {
        AgentItem::Reasoning { text } => (OutputCategory::Reasoning, text),
        AgentItem::AgentMessage { text } => (OutputCategory::Message, text),
        AgentItem::Error { message } => (OutputCategory::Error, message),
        AgentItem::CommandExecution {
            aggregated_output,
            status,
        } if status == "completed" => (OutputCategory::Command, aggregated_output),
        _ => return None,
    };
    Some(Classified {
        category,
        content: content.trim().to_string(),
    })
}
