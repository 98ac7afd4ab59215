use serde_json::Value;

/// Summary shown for records whose payload failed to parse.
pub const UNPARSEABLE_SUMMARY: &str = "No data available";

/// One archived conversation, keyed by `conversation_id`.
///
/// `payload` is the parsed form of `payload_raw`; parse failures degrade
/// the record (`payload = None`, `message_count = 0`, sentinel summary)
/// instead of failing the load that produced it.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: i64,
    pub conversation_id: String,
    pub active_task_id: Option<String>,
    pub payload_raw: String,
    pub payload: Option<Value>,
    pub last_modified_at: String,
    pub message_count: usize,
}

impl ConversationRecord {
    pub fn new(
        id: i64,
        conversation_id: String,
        active_task_id: Option<String>,
        payload_raw: String,
        last_modified_at: String,
    ) -> Self {
        let payload = serde_json::from_str::<Value>(&payload_raw).ok();
        let message_count = payload.as_ref().map(count_messages).unwrap_or(0);
        Self {
            id,
            conversation_id,
            active_task_id,
            payload_raw,
            payload,
            last_modified_at,
            message_count,
        }
    }

    /// Build a record from an already-parsed payload, e.g. one decoded from
    /// a portable document.
    pub fn from_parsed(
        id: i64,
        conversation_id: String,
        active_task_id: Option<String>,
        payload: Value,
        last_modified_at: String,
    ) -> Self {
        let payload_raw = payload.to_string();
        let message_count = count_messages(&payload);
        Self {
            id,
            conversation_id,
            active_task_id,
            payload_raw,
            payload: Some(payload),
            last_modified_at,
            message_count,
        }
    }

    /// Short human-readable roll-up of the payload contents.
    pub fn summary(&self) -> String {
        let Some(payload) = &self.payload else {
            return UNPARSEABLE_SUMMARY.to_string();
        };

        let mut parts = Vec::new();
        if self.message_count > 0 {
            parts.push(format!("{} items", self.message_count));
        }

        if let Some(lists) = payload.get("todo_lists").and_then(Value::as_array) {
            for list in lists {
                let completed = item_count(list, "completed_items");
                let pending = item_count(list, "pending_items");
                if completed > 0 {
                    parts.push(format!("{completed} completed"));
                }
                if pending > 0 {
                    parts.push(format!("{pending} pending"));
                }
            }
        }

        if parts.is_empty() {
            "Empty conversation".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn item_count(list: &Value, key: &str) -> usize {
    list.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

/// Messages are the work items tracked inside the payload's todo lists.
fn count_messages(payload: &Value) -> usize {
    let Some(lists) = payload.get("todo_lists").and_then(Value::as_array) else {
        return 0;
    };
    lists
        .iter()
        .map(|list| item_count(list, "completed_items") + item_count(list, "pending_items"))
        .sum()
}
