use std::sync::Arc;

use tracing::{debug, instrument};
use wallet_core::{Clock, ConversationContext, ConversationTurn};
use wallet_error::{Result, WalletError};
use wallet_llm::ChatModel;

use crate::config::AssistantCfg;
use crate::model_failure;

/// 会话首轮：先用用户名简短问候
pub const GREETING_INSTRUCTION: &str = "This is the first message of the conversation. \
Open with a brief, friendly salutation that uses the user's name from the user profile \
(for example \"Hi Aadhar!\"), then answer.";

/// 后续轮次：不再问候，直接回答
pub const FOLLOW_UP_INSTRUCTION: &str = "This is a follow-up message in an ongoing conversation. \
OMIT the salutation entirely. Start with the answer, or at most a brief acknowledgment \
such as \"Certainly,\" or \"Got it.\"";

/// 首轮示例，与 `GREETING_INSTRUCTION` 同时出现
const FIRST_TURN_EXAMPLE: &str = "Example of a first turn:\n\
User: Based on my data, what was the last action I took?\n\
Assistant: Hi Aadhar! Your last action was a 'groceries' transaction on Friday, 25 July 2025, at 23:38 GMT.";

/// 后续轮次示例，示例回答本身不含问候语
const FOLLOW_UP_EXAMPLE: &str = "Example of a follow-up turn:\n\
User: How many transactions did I make on that day?\n\
Assistant: You made 3 transactions on Friday, 25 July 2025.\n\
User: Okay, thanks. Now show me my first movie purchase.\n\
Assistant: Certainly. Your first recorded movie-related purchase was on Thursday, 24 July 2025.";

/// 请求未携带交易数据时的占位文本，与"零笔交易"区分
const NO_TRANSACTIONS_MARKER: &str = "(no transaction data provided)";

const TRUNCATION_MARKER: &str = "\n...[context truncated]";

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub persona: String,
    pub location_hint: Option<String>,
    pub max_history_turns: usize,
    pub max_context_chars: usize,
}

impl From<&AssistantCfg> for AssistantSettings {
    fn from(cfg: &AssistantCfg) -> Self {
        Self {
            persona: cfg.persona.clone(),
            location_hint: cfg.location_hint.clone(),
            max_history_turns: cfg.max_history_turns,
            max_context_chars: cfg.max_context_chars,
        }
    }
}

/// 对话式消费查询助手，只依据请求携带的数据回答
pub struct ConversationalQueryAssistant {
    model: Arc<dyn ChatModel>,
    clock: Arc<dyn Clock>,
    settings: AssistantSettings,
}

impl ConversationalQueryAssistant {
    pub fn new(model: Arc<dyn ChatModel>, clock: Arc<dyn Clock>, settings: AssistantSettings) -> Self {
        Self {
            model,
            clock,
            settings,
        }
    }

    #[instrument(skip(self, ctx), fields(history = ctx.history.len()))]
    pub async fn answer(&self, ctx: &ConversationContext) -> Result<String> {
        let prompt = self.build_prompt(ctx)?;
        debug!(prompt_chars = prompt.len(), "assistant prompt built");
        self.model
            .generate(&prompt)
            .await
            .map_err(|e| model_failure("chat", e))
    }

    /// 组装发送给模型的完整提示词
    pub fn build_prompt(&self, ctx: &ConversationContext) -> Result<String> {
        let query = ctx.query.trim();
        if query.is_empty() {
            return Err(WalletError::validation("Missing 'user_query' in request body"));
        }

        let transcript = self.transcript(&ctx.history);
        let (turn_instruction, turn_example) = if transcript.is_empty() {
            (GREETING_INSTRUCTION, FIRST_TURN_EXAMPLE)
        } else {
            (FOLLOW_UP_INSTRUCTION, FOLLOW_UP_EXAMPLE)
        };

        let transactions = ctx
            .transactions
            .as_ref()
            .map(render_json)
            .unwrap_or_else(|| NO_TRANSACTIONS_MARKER.to_string());
        let transactions = truncate_chars(&transactions, self.settings.max_context_chars);
        let profile = ctx
            .user_profile
            .as_ref()
            .map(render_json)
            .unwrap_or_else(|| "{}".to_string());

        let today = self.clock.now().format("%A, %d %B %Y");
        let location = self
            .settings
            .location_hint
            .as_deref()
            .map(|l| format!(" The user is located in {}.", l))
            .unwrap_or_default();

        let mut prompt = String::new();
        prompt.push_str(&format!(
            "You are {}, a personal finance assistant inside a receipt wallet app. \
Today's date is {}.{}\n\n",
            self.settings.persona, today, location
        ));
        prompt.push_str(
            "Rules:\n\
- Answer ONLY from the transaction data and user profile below. Never invent transactions, \
merchants or amounts.\n\
- If the data does not contain the answer, say so plainly.\n\
- Keep answers short and conversational. Use the currency shown in the data.\n\n",
        );
        prompt.push_str(turn_instruction);
        prompt.push_str("\n\n");
        prompt.push_str(turn_example);
        prompt.push_str("\n\n");

        prompt.push_str("USER PROFILE:\n");
        prompt.push_str(&profile);
        prompt.push_str("\n\nTRANSACTION DATA:\n");
        prompt.push_str(&transactions);
        prompt.push_str("\n\n");

        if !transcript.is_empty() {
            prompt.push_str("CONVERSATION SO FAR:\n");
            prompt.push_str(&transcript);
            prompt.push_str("\n\n");
        }

        prompt.push_str(&format!("User's question: \"{}\"\nAssistant:", query));
        Ok(prompt)
    }

    /// 最近若干轮对话，按 `User:` / `Assistant:` 逐行渲染
    fn transcript(&self, history: &[ConversationTurn]) -> String {
        let turns: Vec<&ConversationTurn> = history.iter().filter(|t| !t.is_empty()).collect();
        let skip = turns.len().saturating_sub(self.settings.max_history_turns);
        let mut lines = Vec::new();
        for turn in turns.into_iter().skip(skip) {
            if let Some(user) = &turn.user {
                lines.push(format!("User: {}", user.trim()));
            }
            if let Some(assistant) = &turn.assistant {
                lines.push(format!("Assistant: {}", assistant.trim()));
            }
        }
        lines.join("\n")
    }
}

fn render_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use wallet_core::{AssistantRequest, FixedClock};

    struct CapturingModel {
        prompts: Mutex<Vec<String>>,
        reply: Result<String>,
    }

    #[async_trait]
    impl ChatModel for CapturingModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn settings() -> AssistantSettings {
        AssistantSettings {
            persona: "Gemini".into(),
            location_hint: Some("Bengaluru, India".into()),
            max_history_turns: 20,
            max_context_chars: 48_000,
        }
    }

    fn assistant(model: Arc<CapturingModel>, settings: AssistantSettings) -> ConversationalQueryAssistant {
        ConversationalQueryAssistant::new(
            model,
            Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2025, 7, 27, 9, 0, 0).unwrap(),
            )),
            settings,
        )
    }

    fn model(reply: Result<String>) -> Arc<CapturingModel> {
        Arc::new(CapturingModel {
            prompts: Mutex::new(Vec::new()),
            reply,
        })
    }

    fn context(history: serde_json::Value, query: &str) -> ConversationContext {
        let req: AssistantRequest = serde_json::from_value(json!({
            "user_data": {"name": "Aadhar"},
            "user_query": query,
            "context": [{"merchant": "Cafe", "amount": 250}],
            "chat_history": history
        }))
        .unwrap();
        ConversationContext::from_request(req)
    }

    #[tokio::test]
    async fn test_first_turn_uses_greeting() {
        let m = model(Ok("Hi Aadhar! You spent ₹250.".into()));
        let reply = assistant(Arc::clone(&m), settings())
            .answer(&context(json!([]), "How much did I spend?"))
            .await
            .unwrap();
        assert_eq!(reply, "Hi Aadhar! You spent ₹250.");

        let prompts = m.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let prompt = &prompts[0];
        assert!(prompt.contains(GREETING_INSTRUCTION));
        assert!(!prompt.contains(FOLLOW_UP_INSTRUCTION));
        assert!(prompt.contains(FIRST_TURN_EXAMPLE));
        assert!(!prompt.contains(FOLLOW_UP_EXAMPLE));
        assert!(!prompt.contains("CONVERSATION SO FAR"));
        assert!(prompt.contains("Sunday, 27 July 2025"));
        assert!(prompt.contains("Bengaluru, India"));
        assert!(prompt.contains(r#""merchant":"Cafe""#));
        assert!(prompt.ends_with("User's question: \"How much did I spend?\"\nAssistant:"));
    }

    #[tokio::test]
    async fn test_follow_up_omits_greeting() {
        let m = model(Ok("Certainly, ₹250 at Cafe.".into()));
        let history = json!([{"User": "hi", "AI": "Hi Aadhar!"}]);
        assistant(Arc::clone(&m), settings())
            .answer(&context(history, "Where did I eat?"))
            .await
            .unwrap();

        let prompt = &m.prompts.lock().unwrap()[0];
        assert!(prompt.contains(FOLLOW_UP_INSTRUCTION));
        assert!(!prompt.contains(GREETING_INSTRUCTION));
        assert!(prompt.contains(FOLLOW_UP_EXAMPLE));
        assert!(!prompt.contains(FIRST_TURN_EXAMPLE));
        assert!(prompt.contains("User: hi\nAssistant: Hi Aadhar!"));
    }

    #[test]
    fn test_follow_up_example_has_no_salutation() {
        assert!(FIRST_TURN_EXAMPLE.contains("Hi Aadhar!"));
        assert!(!FOLLOW_UP_EXAMPLE.contains("Hi "));
        assert!(!FOLLOW_UP_EXAMPLE.contains("Aadhar"));
    }

    #[test]
    fn test_missing_transactions_render_marker() {
        let a = assistant(model(Ok(String::new())), settings());
        let prompt = a
            .build_prompt(&ConversationContext {
                query: "hi".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(prompt.contains(&format!("TRANSACTION DATA:\n{}\n", NO_TRANSACTIONS_MARKER)));
        assert!(prompt.contains("no transaction data"));
        assert!(!prompt.contains("TRANSACTION DATA:\n[]"));
        assert!(prompt.contains(GREETING_INSTRUCTION));
    }

    #[test]
    fn test_blank_history_entries_count_as_first_turn() {
        let a = assistant(model(Ok(String::new())), settings());
        let prompt = a
            .build_prompt(&context(json!([{"User": "  "}, {"note": "x"}]), "hello"))
            .unwrap();
        assert!(prompt.contains(GREETING_INSTRUCTION));
    }

    #[test]
    fn test_history_keeps_most_recent_turns() {
        let a = assistant(
            model(Ok(String::new())),
            AssistantSettings {
                max_history_turns: 2,
                ..settings()
            },
        );
        let history = json!([
            {"User": "one", "AI": "1"},
            {"User": "two", "AI": "2"},
            {"User": "three", "AI": "3"}
        ]);
        let prompt = a.build_prompt(&context(history, "next")).unwrap();
        assert!(!prompt.contains("User: one"));
        assert!(prompt.contains("User: two\nAssistant: 2\nUser: three\nAssistant: 3"));
    }

    #[test]
    fn test_context_is_truncated_on_char_boundary() {
        assert_eq!(truncate_chars("₹₹₹", 5), "₹₹₹");
        assert_eq!(truncate_chars("₹₹₹", 2), format!("₹₹{}", TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected_before_model_call() {
        let m = model(Ok("unused".into()));
        let err = assistant(Arc::clone(&m), settings())
            .answer(&context(json!([]), "   "))
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_http_status(), 400);
        assert!(m.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_model_error_maps_to_model_unavailable() {
        let m = model(Err(WalletError::Network {
            operation: "generate".into(),
            message: "dns".into(),
        }));
        let err = assistant(m, settings())
            .answer(&context(json!([]), "hi"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::ModelUnavailable { .. }));
    }
}
