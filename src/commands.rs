//! Command execution.

use crate::Commands;
use chrono::Utc;
use colored::Colorize;
use coinspro_client::{Client, ClientConfig};
use serde_json::Value;

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Ping => {
            let reply = client.ping().await?;
            let msg = reply["msg"].as_str().unwrap_or("PONG");
            Ok(msg.green().to_string())
        }

        Commands::Call { name, body } => {
            let body = parse_json_arg(&body)?;
            let reply = client.session().call(&name, body).await?;
            Ok(format_json(&reply.payload.into_value()))
        }

        Commands::Instruments => {
            let result = client.get_instruments().await?;
            let Some(items) = result.as_array() else {
                return Ok(format_json(&result));
            };
            if items.is_empty() {
                return Ok("No instruments".yellow().to_string());
            }

            let mut output = String::new();
            for item in items {
                let id = item["InstrumentId"].as_u64().unwrap_or_default();
                let symbol = item["Symbol"].as_str().unwrap_or("?");
                output.push_str(&format!("  {:>4} {}\n", id, symbol.cyan()));
            }
            Ok(output)
        }

        Commands::Products => {
            let result = client.get_products().await?;
            let Some(items) = result.as_array() else {
                return Ok(format_json(&result));
            };
            if items.is_empty() {
                return Ok("No products".yellow().to_string());
            }

            let mut output = String::new();
            for item in items {
                let id = item["ProductId"].as_u64().unwrap_or_default();
                let symbol = item["Product"].as_str().unwrap_or("?");
                let name = item["ProductFullName"].as_str().unwrap_or("");
                output.push_str(&format!("  {:>4} {} {}\n", id, symbol.cyan(), name));
            }
            Ok(output)
        }

        // Sign runs offline and streams run in main.rs
        Commands::Sign { .. }
        | Commands::Level1 { .. }
        | Commands::Level2 { .. }
        | Commands::Trades { .. }
        | Commands::AccountEvents => unreachable!(),
    }
}

/// Signs the handshake for the configured credentials.
pub fn sign(
    config: &ClientConfig,
    nonce: Option<String>,
) -> Result<String, Box<dyn std::error::Error>> {
    let nonce = nonce.unwrap_or_else(|| Utc::now().timestamp_millis().to_string());
    let credentials = &config.credentials;
    let signature = coinspro_protocol::sign(
        &nonce,
        &credentials.user_id,
        &credentials.api_key,
        &credentials.api_secret,
    )?;
    Ok(format!("Nonce: {}\nSignature: {}", nonce, signature))
}

/// Parses a JSON argument (either inline JSON or @file.json).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinspro_client::Credentials;

    #[test]
    fn test_parse_inline_json() {
        let value = parse_json_arg(r#"{"OMSId": 1}"#).unwrap();
        assert_eq!(value["OMSId"], 1);
        assert!(parse_json_arg("{oops").is_err());
    }

    #[test]
    fn test_sign_with_fixed_nonce() {
        let config = ClientConfig::new(Credentials::new("7", "key", "secret"));
        let output = sign(&config, Some("1598000000000".to_string())).unwrap();
        let expected = coinspro_protocol::sign("1598000000000", "7", "key", "secret").unwrap();
        assert!(output.contains("Nonce: 1598000000000"));
        assert!(output.ends_with(&expected));
    }

    #[test]
    fn test_sign_without_secret_fails() {
        let config = ClientConfig::new(Credentials::new("7", "key", ""));
        assert!(sign(&config, Some("1".to_string())).is_err());
    }
}
