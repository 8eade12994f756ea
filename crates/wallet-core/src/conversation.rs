use serde::{Deserialize, Serialize};

/// 一轮对话；任一侧都可能缺失
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: Option<String>,
    pub assistant: Option<String>,
}

impl ConversationTurn {
    /// 从 `{"User": "...", "AI": "..."}` 形式的对象读取，键名不区分大小写。
    /// 助手一侧同时接受 `ai` 与 `assistant`。
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut turn = ConversationTurn::default();
        for (key, v) in obj {
            let text = match v.as_str() {
                Some(s) if !s.trim().is_empty() => s.to_string(),
                _ => continue,
            };
            match key.to_ascii_lowercase().as_str() {
                "user" => turn.user = Some(text),
                "ai" | "assistant" => turn.assistant = Some(text),
                _ => {}
            }
        }
        if turn.is_empty() {
            None
        } else {
            Some(turn)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.assistant.is_none()
    }
}

/// 单次问答的全部上下文
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub history: Vec<ConversationTurn>,
    /// 交易数据，作为回答的唯一事实来源
    pub transactions: Option<serde_json::Value>,
    pub user_profile: Option<serde_json::Value>,
    pub query: String,
}

impl ConversationContext {
    pub fn from_request(req: crate::AssistantRequest) -> Self {
        Self {
            history: req
                .chat_history
                .iter()
                .filter_map(ConversationTurn::from_value)
                .collect(),
            transactions: req.context,
            user_profile: req.user_data,
            query: req.user_query.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_keys_are_case_insensitive() {
        let t = ConversationTurn::from_value(&json!({"User": "hi", "AI": "hello"})).unwrap();
        assert_eq!(t.user.as_deref(), Some("hi"));
        assert_eq!(t.assistant.as_deref(), Some("hello"));

        let t = ConversationTurn::from_value(&json!({"USER": "q", "Assistant": "a"})).unwrap();
        assert_eq!(t.user.as_deref(), Some("q"));
        assert_eq!(t.assistant.as_deref(), Some("a"));
    }

    #[test]
    fn test_turn_without_either_side_is_skipped() {
        assert!(ConversationTurn::from_value(&json!({"other": "x"})).is_none());
        assert!(ConversationTurn::from_value(&json!({"user": "", "ai": "  "})).is_none());
        assert!(ConversationTurn::from_value(&json!("plain string")).is_none());

        let t = ConversationTurn::from_value(&json!({"ai": "only answer"})).unwrap();
        assert!(t.user.is_none());
    }

    #[test]
    fn test_context_from_request_drops_empty_turns() {
        let req = crate::AssistantRequest {
            user_data: Some(json!({"name": "Alice"})),
            user_query: Some("what did I buy?".into()),
            context: None,
            chat_history: vec![json!({"user": "a", "ai": "b"}), json!({}), json!({"User": "c"})],
        };
        let ctx = ConversationContext::from_request(req);
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.query, "what did I buy?");
    }
}
