use serde::{Deserialize, Serialize};

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageKind {
    User,
    Bot,
    System,
}

/// A file the backend pointed at while producing an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Bot => "bot",
            MessageKind::System => "system",
        }
    }
}

impl TryFrom<&str> for MessageKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(MessageKind::User),
            "bot" => Ok(MessageKind::Bot),
            "system" => Ok(MessageKind::System),
            _ => Err(format!("invalid message type: {value}")),
        }
    }
}

impl TryFrom<String> for MessageKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<MessageKind> for String {
    fn from(value: MessageKind) -> Self {
        value.as_str().to_string()
    }
}

impl Citation {
    pub fn new(file_name: impl Into<String>, source_reference: Option<String>) -> Self {
        Self {
            file_name: file_name.into(),
            source_reference,
        }
    }
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::User,
            content: content.into(),
            citations: None,
        }
    }

    /// Bot answers keep their citations; an empty list is stored as `None`.
    pub fn bot(content: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            kind: MessageKind::Bot,
            content: content.into(),
            citations: (!citations.is_empty()).then_some(citations),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            content: content.into(),
            citations: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind == MessageKind::User
    }

    pub fn citations(&self) -> &[Citation] {
        self.citations.as_deref().unwrap_or_default()
    }

    /// Comma-separated file names, as shown under an answer.
    pub fn sources_line(&self) -> Option<String> {
        let citations = self.citations();
        if citations.is_empty() {
            return None;
        }
        let names: Vec<&str> = citations.iter().map(|c| c.file_name.as_str()).collect();
        Some(format!("Sources: {}", names.join(", ")))
    }
}
