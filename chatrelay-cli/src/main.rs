//! chatrelay-cli: front end for the chatrelay server
//!
//! Collects a user id, user name and message, sends them to `POST /chat` and
//! prints the reply.
//!
//! # Subcommands
//! - `send --user-id <N> --user-name <NAME> <MESSAGE>...`: send one message
//! - `status`: show server health

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "chatrelay-cli", version, about = "Talk to the chatrelay AI chatbot")]
struct Cli {
    /// chatrelay server URL (overrides CHATRELAY_URL env var)
    #[arg(long, env = "CHATRELAY_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a message and print the AI's reply
    Send {
        /// Your numeric user id
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        user_id: i64,

        /// Your display name
        #[arg(long, default_value = "")]
        user_name: String,

        /// Message text; multiple words are joined with spaces
        message: Vec<String>,
    },

    /// Show chatrelay server status
    Status,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChatPayload<'a> {
    pub user_id: i64,
    pub user_name: &'a str,
    pub input: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Outcome of one chat exchange, as shown to the user.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Reply(String),
    Failed { status: u16, error: String },
}

impl Outcome {
    pub fn render(&self) -> String {
        match self {
            Outcome::Reply(text) => format!("AI: {}", text),
            Outcome::Failed { status, error } => format!("Error: {}, {}", status, error),
        }
    }
}

/// Both fields must be non-blank before anything is sent.
pub fn check_fields(user_name: &str, message: &str) -> Result<(), &'static str> {
    if user_name.trim().is_empty() || message.trim().is_empty() {
        return Err("Please fill in all the fields.");
    }
    Ok(())
}

/// Turn a status code and decoded body into an [`Outcome`].
pub fn interpret(status: u16, body: Option<ChatReply>) -> Outcome {
    match body {
        Some(reply) if (200..300).contains(&status) => Outcome::Reply(
            reply
                .response
                .unwrap_or_else(|| "Sorry, something went wrong!".to_string()),
        ),
        Some(reply) => Outcome::Failed {
            status,
            error: reply.error.unwrap_or_else(|| "unknown error".to_string()),
        },
        None => Outcome::Failed {
            status,
            error: "unreadable response".to_string(),
        },
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Send one message; the call blocks until the server answers.
fn do_send(server: &str, user_id: i64, user_name: &str, message: &str) -> anyhow::Result<()> {
    if let Err(msg) = check_fields(user_name, message) {
        eprintln!("{}", msg);
        std::process::exit(2);
    }

    let client = reqwest::blocking::Client::builder().timeout(None).build()?;

    let url = format!("{}/chat", server);
    let payload = ChatPayload {
        user_id,
        user_name,
        input: message,
    };

    let resp = match client.post(&url).json(&payload).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let status = resp.status().as_u16();
    let outcome = interpret(status, resp.json::<ChatReply>().ok());

    match &outcome {
        Outcome::Reply(_) => println!("{}", outcome.render()),
        Outcome::Failed { .. } => {
            eprintln!("{}", outcome.render());
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("chatrelay server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
            println!("SQLite:           {}", body["sqlite"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("chatrelay-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("chatrelay-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Send {
            user_id,
            user_name,
            message,
        } => do_send(&server, user_id, &user_name, &message.join(" ")),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("chatrelay-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_fields_rejects_blank_input() {
        assert_eq!(check_fields("", "hi"), Err("Please fill in all the fields."));
        assert_eq!(check_fields("ada", "   "), Err("Please fill in all the fields."));
        assert!(check_fields("ada", "hi").is_ok());
    }

    #[test]
    fn test_payload_field_names_match_server() {
        let payload = ChatPayload {
            user_id: 7,
            user_name: "ada",
            input: "hello",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "user_id": 7, "user_name": "ada", "input": "hello" }));
    }

    #[test]
    fn test_interpret_success() {
        let body = ChatReply {
            response: Some("Hi!".to_string()),
            error: None,
        };
        let outcome = interpret(200, Some(body));
        assert_eq!(outcome, Outcome::Reply("Hi!".to_string()));
        assert_eq!(outcome.render(), "AI: Hi!");
    }

    #[test]
    fn test_interpret_success_without_response_field() {
        let body = ChatReply {
            response: None,
            error: None,
        };
        assert_eq!(
            interpret(200, Some(body)).render(),
            "AI: Sorry, something went wrong!"
        );
    }

    #[test]
    fn test_interpret_server_error() {
        let body: ChatReply =
            serde_json::from_str(r#"{"error":"Internal Server Error"}"#).unwrap();
        let outcome = interpret(500, Some(body));
        assert_eq!(outcome.render(), "Error: 500, Internal Server Error");
    }

    #[test]
    fn test_interpret_unreadable_body() {
        assert_eq!(
            interpret(502, None),
            Outcome::Failed {
                status: 502,
                error: "unreadable response".to_string()
            }
        );
    }

    #[test]
    fn test_cli_rejects_zero_user_id() {
        let parsed = Cli::try_parse_from([
            "chatrelay-cli",
            "send",
            "--user-id",
            "0",
            "--user-name",
            "ada",
            "hi",
        ]);
        assert!(parsed.is_err(), "user id must be at least 1");
    }

    #[test]
    fn test_cli_joins_message_words() {
        let cli = Cli::try_parse_from([
            "chatrelay-cli",
            "--server",
            "http://localhost:9000",
            "send",
            "--user-id",
            "3",
            "--user-name",
            "ada",
            "how",
            "are",
            "you",
        ])
        .unwrap();
        match cli.command {
            Commands::Send { user_id, message, .. } => {
                assert_eq!(user_id, 3);
                assert_eq!(message.join(" "), "how are you");
            }
            other => panic!("Expected Send, got {:?}", other),
        }
        assert_eq!(cli.server, "http://localhost:9000");
    }
}
