//! Chat transcript formatting.
//!
//! The session itself is stateless across requests; hosts keep the
//! history and re-render the whole conversation for every turn.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message (role + content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Prompt layout expected by a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatFormat {
    /// `<|start_header_id|>role<|end_header_id|>` turns ended by `<|eot_id|>`.
    Llama3,
    /// `<|im_start|>role` turns ended by `<|im_end|>` (Qwen).
    ChatMl,
    /// `<|role|>` turns ended by `</s>` (TinyLlama).
    Zephyr,
    /// `[INST] ... [/INST]` pairs.
    #[default]
    Mistral,
}

impl ChatFormat {
    /// Guess the format from a model name or file name.
    pub fn detect(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        if ["llama 3", "llama-3", "llama3"].iter().any(|k| name.contains(k)) {
            Self::Llama3
        } else if name.contains("qwen") {
            Self::ChatMl
        } else if name.contains("tinyllama") {
            Self::Zephyr
        } else {
            Self::Mistral
        }
    }

    /// Render `history` plus the new user `input`, ending with an open
    /// assistant turn for the model to complete.
    pub fn render(self, system: &str, history: &[ChatMessage], input: &str) -> String {
        let mut out = String::new();
        match self {
            Self::Llama3 => {
                out.push_str("<|begin_of_text|>");
                let mut turn = |role: &str, content: &str| {
                    out.push_str(&format!(
                        "<|start_header_id|>{role}<|end_header_id|>\n\n{content}<|eot_id|>"
                    ));
                };
                turn("system", system);
                for m in history {
                    turn(m.role.as_str(), &m.content);
                }
                turn("user", input);
                out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
            }
            Self::ChatMl => {
                let mut turn = |role: &str, content: &str| {
                    out.push_str(&format!("<|im_start|>{role}\n{content}<|im_end|>\n"));
                };
                turn("system", system);
                for m in history {
                    turn(m.role.as_str(), &m.content);
                }
                turn("user", input);
                out.push_str("<|im_start|>assistant\n");
            }
            Self::Zephyr => {
                let mut turn = |role: &str, content: &str| {
                    out.push_str(&format!("<|{role}|>\n{content}</s>\n"));
                };
                turn("system", system);
                for m in history {
                    turn(m.role.as_str(), &m.content);
                }
                turn("user", input);
                out.push_str("<|assistant|>\n");
            }
            Self::Mistral => {
                if history.is_empty() {
                    out.push_str(&format!("<s>[INST] {system}\n\n{input} [/INST]"));
                } else {
                    out.push_str(&format!("<s>[INST] {system} [/INST] </s>"));
                    for m in history {
                        match m.role {
                            Role::User => out.push_str(&format!("<s>[INST] {} [/INST] ", m.content)),
                            Role::Assistant => out.push_str(&format!("{} </s>", m.content)),
                        }
                    }
                    out.push_str(&format!("<s>[INST] {input} [/INST]"));
                }
            }
        }
        out
    }
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_families_from_file_names() {
        assert_eq!(ChatFormat::detect("Meta-Llama-3-8B-Instruct.Q4_K_M.gguf"), ChatFormat::Llama3);
        assert_eq!(ChatFormat::detect("Llama 3.2 1B"), ChatFormat::Llama3);
        assert_eq!(ChatFormat::detect("qwen2.5-0.5b-instruct-q8_0.gguf"), ChatFormat::ChatMl);
        assert_eq!(ChatFormat::detect("tinyllama-1.1b-chat.gguf"), ChatFormat::Zephyr);
        assert_eq!(ChatFormat::detect("mistral-7b-instruct.gguf"), ChatFormat::Mistral);
        assert_eq!(ChatFormat::detect(""), ChatFormat::Mistral);
    }

    #[test]
    fn llama3_ends_with_open_assistant_header() {
        let prompt = ChatFormat::Llama3.render("Be brief.", &[], "Hi");
        assert_eq!(
            prompt,
            "<|begin_of_text|>\
             <|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\nHi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn chatml_replays_history_in_order() {
        let history = [ChatMessage::user("a"), ChatMessage::assistant("b")];
        let prompt = ChatFormat::ChatMl.render("sys", &history, "c");
        assert_eq!(
            prompt,
            "<|im_start|>system\nsys<|im_end|>\n\
             <|im_start|>user\na<|im_end|>\n\
             <|im_start|>assistant\nb<|im_end|>\n\
             <|im_start|>user\nc<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn zephyr_turns() {
        let prompt = ChatFormat::Zephyr.render("sys", &[], "q");
        assert_eq!(prompt, "<|system|>\nsys</s>\n<|user|>\nq</s>\n<|assistant|>\n");
    }

    #[test]
    fn mistral_with_and_without_history() {
        assert_eq!(
            ChatFormat::Mistral.render("sys", &[], "q"),
            "<s>[INST] sys\n\nq [/INST]"
        );
        let history = [ChatMessage::user("a"), ChatMessage::assistant("b")];
        assert_eq!(
            ChatFormat::Mistral.render("sys", &history, "q"),
            "<s>[INST] sys [/INST] </s><s>[INST] a [/INST] b </s><s>[INST] q [/INST]"
        );
    }

    #[test]
    fn messages_use_lowercase_roles_in_json() {
        let json = serde_json::to_string(&ChatMessage::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
