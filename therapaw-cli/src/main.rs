//! therapaw-cli: command-line frontend for the Therapaw HTTP API
//!
//! # Subcommands
//! - `analyze <photo> [--json]`: upload a photo, print the session id
//! - `session <id> [--json]`: print a stored evaluation
//! - `chat <id> <message>`: ask a follow-up question about an evaluation
//! - `status`: show server health

use std::path::Path;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:3000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "therapaw-cli",
    version,
    about = "Therapaw behavioral evaluations from the command line"
)]
struct Cli {
    /// Therapaw HTTP server URL (overrides THERAPAW_HTTP_URL env var)
    #[arg(long, env = "THERAPAW_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a dog photo for evaluation
    Analyze {
        /// Path to a JPEG, PNG, GIF or WebP image
        photo: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Show the evaluation stored under a session id
    Session {
        id: String,

        /// Print the raw session JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the therapist a follow-up question about a session
    Chat {
        /// Session id returned by `analyze`
        id: String,

        /// The question to ask
        message: String,
    },

    /// Show Therapaw server status
    Status,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub session_id: String,
    pub persistence: String,
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub analysis: String,
    pub image_url: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub messages: Vec<serde_json::Value>,
    pub session_id: String,
}

/// Build a single-turn chat request grounded in `session_id`.
pub fn chat_payload(session_id: &str, message: &str) -> ChatPayload {
    ChatPayload {
        messages: vec![serde_json::json!({ "role": "user", "content": message })],
        session_id: session_id.to_string(),
    }
}

/// Guess the upload content type from the file extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// One-line summary of an image reference; inline data URLs are too long to print.
pub fn describe_image_reference(reference: &str) -> String {
    match reference.strip_prefix("data:") {
        Some(rest) => {
            let mime = rest.split(';').next().unwrap_or("unknown");
            format!("inline {} ({} chars)", mime, reference.len())
        }
        None if reference.is_empty() => "none".to_string(),
        None => reference.to_string(),
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Exit with the server's error message on a non-2xx response.
fn expect_success(resp: reqwest::blocking::Response) -> reqwest::blocking::Response {
    if resp.status().is_success() {
        return resp;
    }
    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("no details");
    eprintln!("therapaw-cli: server returned {}: {}", status, message);
    std::process::exit(1);
}

/// Upload a photo to POST /api/analyze.
fn do_analyze(server: &str, photo: &str, json_output: bool) -> anyhow::Result<()> {
    let path = Path::new(photo);
    let Some(mime) = mime_for_path(path) else {
        anyhow::bail!("{} does not look like an image", photo);
    };
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("photo")
        .to_string();

    let part = reqwest::blocking::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime)?;
    let form = reqwest::blocking::multipart::Form::new().part("image", part);

    // Vision predictions can take a couple of minutes
    let url = format!("{}/api/analyze", server);
    let resp = match client(180)?.post(&url).multipart(form).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("therapaw-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    let resp = expect_success(resp);

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let analyzed: AnalyzeResponse = resp.json()?;
    println!("Session:     {}", analyzed.session_id);
    println!("Persistence: {}", analyzed.persistence);
    if let Some(warning) = analyzed.warning {
        eprintln!("Warning:     {}", warning);
    }
    Ok(())
}

/// Fetch GET /api/session/:id.
fn do_session(server: &str, id: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/session/{}", server, id);
    let resp = match client(30)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("therapaw-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    let resp = expect_success(resp);

    if json_output {
        let body: serde_json::Value = resp.json()?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let session: SessionView = resp.json()?;
    println!("Evaluated: {}", session.timestamp);
    println!("Photo:     {}\n", describe_image_reference(&session.image_url));
    println!("{}", session.analysis);
    Ok(())
}

/// Send one question to POST /api/chat.
fn do_chat(server: &str, id: &str, message: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/chat", server);
    let resp = match client(90)?.post(&url).json(&chat_payload(id, message)).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("therapaw-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    let body: serde_json::Value = expect_success(resp).json()?;
    println!("{}", body["message"].as_str().unwrap_or_default());
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Therapaw server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
            println!(
                "Storage:         {} (durable: {})",
                body["storage"]["backend"].as_str().unwrap_or("?"),
                body["storage"]["durable"].as_bool().unwrap_or(false)
            );
            println!("Vision:          {}", body["vision"].as_bool().unwrap_or(false));
            println!("Chat:            {}", body["chat"].as_bool().unwrap_or(false));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("therapaw-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("therapaw-cli: cannot reach {}: {}", url, e);
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
        Commands::Analyze { photo, json } => do_analyze(&server, &photo, json),
        Commands::Session { id, json } => do_session(&server, &id, json),
        Commands::Chat { id, message } => do_chat(&server, &id, &message),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("therapaw-cli: {}", e);
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
    fn test_mime_for_known_extensions() {
        assert_eq!(mime_for_path(Path::new("rex.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("/tmp/rex.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("rex.png")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("rex.webp")), Some("image/webp"));
    }

    #[test]
    fn test_mime_for_unknown_extensions() {
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_describe_inline_image() {
        let described = describe_image_reference("data:image/png;base64,iVBORw0K");
        assert_eq!(described, "inline image/png (30 chars)");
    }

    #[test]
    fn test_describe_remote_image() {
        assert_eq!(
            describe_image_reference("https://cdn.example.com/rex.jpg"),
            "https://cdn.example.com/rex.jpg"
        );
        assert_eq!(describe_image_reference(""), "none");
    }

    #[test]
    fn test_chat_payload_shape() {
        let payload = serde_json::to_value(chat_payload("session-1-abc", "Is he happy?")).unwrap();
        assert_eq!(payload["sessionId"], "session-1-abc");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "Is he happy?");
        assert!(payload.get("behavioralReport").is_none());
    }

    #[test]
    fn test_parse_analyze_response() {
        let body = r#"{"sessionId":"session-1-abc_eyJ9","persistence":"memory","warning":"degraded"}"#;
        let resp: AnalyzeResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.session_id, "session-1-abc_eyJ9");
        assert_eq!(resp.persistence, "memory");
        assert_eq!(resp.warning.as_deref(), Some("degraded"));
    }

    #[test]
    fn test_parse_session_view() {
        let body = r#"{"analysis":"Calm","imageUrl":"data:image/png;base64,AA","timestamp":"2025-01-01T00:00:00Z"}"#;
        let view: SessionView = serde_json::from_str(body).unwrap();
        assert_eq!(view.analysis, "Calm");
        assert_eq!(view.image_url, "data:image/png;base64,AA");
    }
}
