use serde_json::Value;
use talkmee_events::{event_names, EventBus, TracingEventBus};

/// Prints what the learner needs to see and logs everything else.
pub struct ConsoleEventBus;

fn text<'a>(payload: &'a Value, field: &str) -> &'a str {
    payload[field].as_str().unwrap_or_default()
}

/// One line for the terminal, if this event deserves one.
pub fn render(topic: &str, payload: &Value) -> Option<String> {
    match topic {
        event_names::DRILL_TARGET => Some(format!("\nSay: \"{}\"", text(payload, "target"))),
        event_names::DRILL_RESULT => Some(format!(
            "Score {}/100  heard \"{}\"\n  {}\n  {}",
            payload["score"].as_u64().unwrap_or(0),
            text(payload, "spoken"),
            text(payload, "highlighted"),
            text(payload, "feedback"),
        )),
        event_names::DRILL_COUNTDOWN => match payload["seconds_remaining"].as_u64() {
            Some(0) | None => None,
            Some(seconds) => Some(format!("  next in {seconds}s")),
        },
        event_names::DRILL_STATE if payload["state"] == "recording" => {
            Some("Listening... (Enter to stop)".to_string())
        }
        event_names::SESSION_TURN => {
            let who = if payload["role"] == "user" { "you" } else { "tutor" };
            Some(format!("{who:>5}: {}", text(payload, "text")))
        }
        event_names::SESSION_ERROR => Some(format!("! {}", text(payload, "message"))),
        _ => None,
    }
}

impl EventBus for ConsoleEventBus {
    fn emit(&self, topic: &str, payload: Value) {
        if let Some(line) = render(topic, &payload) {
            println!("{line}");
        }
        TracingEventBus.emit(topic, payload);
    }
}
