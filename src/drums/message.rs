//! Drum messages and their mapping onto store records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::address;
use crate::store::{CreateFields, Issue};

pub const MESSAGE_TYPE: &str = "message";
pub const MESSAGE_LABEL: &str = "kind:message";
pub const READ_LABEL: &str = "read";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Store priority: high=1, normal=2, low=3.
    pub fn to_store(self) -> i32 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn from_store(priority: i32) -> Self {
        match priority {
            i32::MIN..=1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "" => Ok(Priority::Normal),
            "high" | "urgent" => Ok(Priority::High),
            other => Err(format!("unknown priority {other:?}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Notification,
    Task,
    Scavenge,
    Reply,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Notification => "notification",
            MessageKind::Task => "task",
            MessageKind::Scavenge => "scavenge",
            MessageKind::Reply => "reply",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notification" | "" => Ok(MessageKind::Notification),
            "task" => Ok(MessageKind::Task),
            "scavenge" => Ok(MessageKind::Scavenge),
            "reply" => Ok(MessageKind::Reply),
            other => Err(format!("unknown message type {other:?}")),
        }
    }
}

/// One drum. Also the JSONL line format of legacy clan mailboxes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
}

fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// `msg-<16 hex>`, used when no store allocates the id.
pub fn new_message_id() -> String {
    format!("msg-{}", random_hex(16))
}

pub fn new_thread_id() -> String {
    format!("thread-{}", random_hex(12))
}

impl Message {
    pub fn new(from: &str, to: &str, subject: &str, body: &str) -> Self {
        Self {
            id: new_message_id(),
            from: address::normalize(from),
            to: address::normalize(to),
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            priority: Priority::Normal,
            kind: MessageKind::Notification,
            read: false,
            thread_id: new_thread_id(),
            reply_to: None,
            cc: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// A reply to `original`, in the same thread.
    pub fn reply(original: &Message, from: &str, body: &str) -> Self {
        let subject = if original.subject.starts_with("Re: ") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };
        let mut reply = Message::new(from, &original.from, &subject, body).with_kind(MessageKind::Reply);
        reply.thread_id = original.thread_id.clone();
        reply.reply_to = Some(original.id.clone());
        reply
    }

    /// Rebuild a message from its store record.
    pub fn from_issue(issue: &Issue) -> Self {
        let timestamp = DateTime::parse_from_rfc3339(&issue.created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            id: issue.id.clone(),
            from: issue.label_value("from").unwrap_or_default().to_string(),
            to: issue.assignee.clone(),
            subject: issue.title.clone(),
            body: issue.description.clone(),
            timestamp,
            priority: Priority::from_store(issue.priority),
            kind: issue
                .label_value("msg-type")
                .and_then(|t| t.parse().ok())
                .unwrap_or_default(),
            read: issue.is_closed() || issue.has_label(READ_LABEL),
            thread_id: issue.label_value("thread").unwrap_or_default().to_string(),
            reply_to: issue.label_value("reply-to").map(str::to_string),
            cc: issue.label_values("cc").map(str::to_string).collect(),
        }
    }

    /// Fields for creating this message's store record. The store assigns the id.
    pub fn to_create_fields(&self) -> CreateFields {
        let mut labels = vec![
            MESSAGE_LABEL.to_string(),
            format!("from:{}", self.from),
            format!("thread:{}", self.thread_id),
            format!("msg-type:{}", self.kind.as_str()),
        ];
        if let Some(ref reply_to) = self.reply_to {
            labels.push(format!("reply-to:{reply_to}"));
        }
        labels.extend(self.cc.iter().map(|cc| format!("cc:{cc}")));
        CreateFields {
            id: None,
            title: self.subject.clone(),
            description: self.body.clone(),
            issue_type: MESSAGE_TYPE.to_string(),
            priority: Some(self.priority.to_store()),
            assignee: Some(self.to.clone()),
            labels,
            actor: Some(self.from.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping() {
        assert_eq!(Priority::High.to_store(), 1);
        assert_eq!(Priority::Normal.to_store(), 2);
        assert_eq!(Priority::Low.to_store(), 3);
        assert_eq!(Priority::from_store(0), Priority::High);
        assert_eq!(Priority::from_store(4), Priority::Low);
        assert_eq!("urgent".parse::<Priority>(), Ok(Priority::High));
    }

    #[test]
    fn ids_have_expected_shape() {
        let msg = Message::new("horde/forge", "horde/witness", "MERGED toast", "");
        assert!(regex::Regex::new(r"^msg-[0-9a-f]{16}$").unwrap().is_match(&msg.id));
        assert!(regex::Regex::new(r"^thread-[0-9a-f]{12}$").unwrap().is_match(&msg.thread_id));
        assert_eq!(msg.to, "horde/witness");
    }

    #[test]
    fn replies_share_thread() {
        let original = Message::new("horde/toast", "warchief", "help", "stuck on tests");
        let reply = Message::reply(&original, "warchief/", "look at the fixture");
        assert_eq!(reply.to, "horde/raiders/toast");
        assert_eq!(reply.thread_id, original.thread_id);
        assert_eq!(reply.reply_to.as_deref(), Some(original.id.as_str()));
        assert_eq!(reply.subject, "Re: help");
        assert_eq!(Message::reply(&reply, "horde/toast", "thanks").subject, "Re: help");
    }

    #[test]
    fn store_record_mapping() {
        let mut msg = Message::new("horde/forge", "horde/witness", "MERGED toast", "Branch: b")
            .with_priority(Priority::High);
        msg.cc = vec!["warchief/".into()];
        msg.reply_to = Some("hd-7".into());
        let fields = msg.to_create_fields();
        assert_eq!(fields.priority, Some(1));
        assert_eq!(fields.assignee.as_deref(), Some("horde/witness"));

        let issue = Issue {
            id: "hd-9".into(),
            title: fields.title.clone(),
            description: fields.description.clone(),
            status: "open".into(),
            priority: 1,
            assignee: "horde/witness".into(),
            labels: fields.labels.clone(),
            created_at: "2026-02-03T04:05:06Z".into(),
            ..Default::default()
        };
        let back = Message::from_issue(&issue);
        assert_eq!(back.from, "horde/forge");
        assert_eq!(back.thread_id, msg.thread_id);
        assert_eq!(back.reply_to.as_deref(), Some("hd-7"));
        assert_eq!(back.cc, vec!["warchief/"]);
        assert_eq!(back.priority, Priority::High);
        assert!(!back.read);
    }
}
