//! Chat commands handled by the proxy itself.
//!
//! Server-bound chat lines starting with the command prefix are answered on
//! the client-bound leg and never reach the real server.

use std::sync::Arc;

use conduit_protocol::registry::{Direction, ProtocolState, base_protocol};
use conduit_protocol::value::Value;

use crate::net::endpoint::Endpoint;
use crate::plugin::{Plugin, PluginHandler};

const CHAT_POSITION_SYSTEM: i8 = 1;

/// Intercepts `!`-prefixed chat and answers without forwarding.
pub struct ChatCommandPlugin {
    prefix: String,
}

impl ChatCommandPlugin {
    /// Creates the plugin; the first activation argument overrides the
    /// command prefix.
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        let prefix = args
            .into_iter()
            .next()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "!".to_owned());
        Self { prefix }
    }

    fn run_command(endpoint: &Arc<Endpoint>, command: &str) {
        match command.split_whitespace().next() {
            Some("ping") => reply(endpoint, "Pong!", Some("green")),
            Some("who") => {
                let text = format!("Proxied via conduit, peer {}", endpoint.peer());
                reply(endpoint, &text, None);
            }
            Some(other) => {
                let text = format!("Unknown command: {other}");
                reply(endpoint, &text, Some("red"));
            }
            None => reply(endpoint, "Missing command", Some("red")),
        }
    }
}

impl Plugin for ChatCommandPlugin {
    fn name(&self) -> &'static str {
        "commands"
    }

    fn handlers(&self) -> Vec<PluginHandler> {
        let prefix = self.prefix.clone();
        vec![PluginHandler {
            direction: Direction::ServerBound,
            state: ProtocolState::Play,
            packet: "ChatMessage",
            handler: Arc::new(move |endpoint, packet| {
                let Some(message) = packet.root().string("message") else {
                    return Ok(false);
                };
                let Some(command) = message.strip_prefix(&prefix) else {
                    return Ok(false);
                };
                let command = command.to_owned();
                ChatCommandPlugin::run_command(endpoint, &command);
                Ok(true)
            }),
        }]
    }
}

/// Sends a system chat line back to the player.
fn reply(endpoint: &Arc<Endpoint>, text: &str, color: Option<&str>) {
    let Some(ty) = base_protocol().packet(Direction::ClientBound, ProtocolState::Play, "ChatMessage")
    else {
        return;
    };
    let mut message = serde_json::json!({ "text": text });
    if let Some(color) = color {
        message["color"] = serde_json::Value::String(color.to_owned());
    }
    let packet = ty.make(vec![
        ("message", Value::Json(message)),
        ("position", Value::Byte(CHAT_POSITION_SYSTEM)),
    ]);
    match packet {
        Ok(packet) => {
            if let Err(err) = endpoint.send(packet) {
                log::warn!("commands: could not answer {}: {err}", endpoint.label());
            }
        }
        Err(err) => log::warn!("commands: could not build chat packet: {err}"),
    }
}
