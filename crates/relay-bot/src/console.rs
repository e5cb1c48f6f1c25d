use anyhow::Result;
use async_trait::async_trait;
use relay_core::{Contact, HandoffState, HumanHandlers, HumanReply, Transport};
use tracing::info;

/// Transport that prints replies to stdout
pub struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        println!("[{}] {}", chat_id, text);
        Ok(())
    }

    async fn get_contact(&self, chat_id: &str) -> Result<Contact> {
        Ok(Contact {
            display_name: Some(chat_id.to_string()),
            number: None,
        })
    }
}

/// Operator side for the console: the person at the terminal is the human agent
pub struct ConsoleOperator;

#[async_trait]
impl HumanHandlers for ConsoleOperator {
    async fn on_handoff(&self, chat_id: &str, state: &HandoffState) -> Result<()> {
        println!(
            "!! {} needs a human ({}); `/release {} <summary>` when done",
            chat_id, state.reason, chat_id
        );
        Ok(())
    }

    async fn on_message(&self, chat_id: &str, text: &str, _state: &HandoffState) -> Result<HumanReply> {
        println!("-> operator [{}] {}", chat_id, text);
        Ok(HumanReply::Handled { response: None })
    }

    async fn on_release(&self, chat_id: &str, summary: &str, _state: &HandoffState) -> Result<()> {
        info!(chat_id, summary, "Operator released chat");
        println!("<- {} is back with the assistant", chat_id);
        Ok(())
    }
}

/// One line typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message { chat_id: String, text: String },
    Handoffs,
    Handoff { chat_id: String, reason: String },
    Release { chat_id: String, summary: String },
    Stats,
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
Type `chat_id: message` to talk as a customer.
Operator commands:
  /handoffs                     list chats owned by a human
  /handoff <chat> <reason>      hand a chat to a human
  /release <chat> <summary>     give a chat back to the assistant
  /stats                        usage statistics
  /quit                         flush threads and exit";

impl Input {
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, rest) = split_word(command);
            return match name {
                "handoffs" => Ok(Self::Handoffs),
                "stats" => Ok(Self::Stats),
                "help" => Ok(Self::Help),
                "quit" | "exit" => Ok(Self::Quit),
                "handoff" => {
                    let (chat_id, reason) = split_word(rest);
                    if chat_id.is_empty() {
                        return Err("usage: /handoff <chat> <reason>".to_string());
                    }
                    let reason = if reason.is_empty() { "operator request" } else { reason };
                    Ok(Self::Handoff {
                        chat_id: chat_id.to_string(),
                        reason: reason.to_string(),
                    })
                }
                "release" => {
                    let (chat_id, summary) = split_word(rest);
                    if chat_id.is_empty() || summary.is_empty() {
                        return Err("usage: /release <chat> <summary>".to_string());
                    }
                    Ok(Self::Release {
                        chat_id: chat_id.to_string(),
                        summary: summary.to_string(),
                    })
                }
                other => Err(format!("unknown command /{} (try /help)", other)),
            };
        }

        let Some((chat_id, text)) = line.split_once(':') else {
            return Err("expected `chat_id: message` or a /command".to_string());
        };
        let chat_id = chat_id.trim();
        if chat_id.is_empty() || chat_id.contains(char::is_whitespace) {
            return Err("chat id must be a single word".to_string());
        }
        Ok(Self::Message {
            chat_id: chat_id.to_string(),
            text: text.trim().to_string(),
        })
    }
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_customer_message() {
        assert_eq!(
            Input::parse("alice: !order item:pizza quantity:2").unwrap(),
            Input::Message {
                chat_id: "alice".to_string(),
                text: "!order item:pizza quantity:2".to_string(),
            }
        );
        assert!(Input::parse("no chat id here").is_err());
        assert!(Input::parse("two words: hi").is_err());
        assert_eq!(Input::parse("   ").unwrap(), Input::Empty);
    }

    #[test]
    fn test_parse_operator_commands() {
        assert_eq!(Input::parse("/handoffs").unwrap(), Input::Handoffs);
        assert_eq!(Input::parse("/stats").unwrap(), Input::Stats);
        assert_eq!(Input::parse("/quit").unwrap(), Input::Quit);
        assert_eq!(
            Input::parse("/release alice Refund issued, all good").unwrap(),
            Input::Release {
                chat_id: "alice".to_string(),
                summary: "Refund issued, all good".to_string(),
            }
        );
        assert_eq!(
            Input::parse("/handoff bob").unwrap(),
            Input::Handoff {
                chat_id: "bob".to_string(),
                reason: "operator request".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_commands() {
        assert!(Input::parse("/release alice").is_err());
        assert!(Input::parse("/handoff").is_err());
        assert!(Input::parse("/dance").is_err());
    }
}
