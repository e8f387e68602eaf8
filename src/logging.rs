use chrono::{SecondsFormat, Utc};
use hostname::get;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{Map, Value};
use std::env;
use std::sync::Arc;

const FALLBACK_SERVICE: &str = "hls-stream-service";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

/// JSON line logger. Every event is one object on stdout (stderr for
/// warnings and errors) carrying service, env and host alongside the
/// event-specific context.
#[derive(Clone, Debug)]
pub struct Logger {
    service: Arc<str>,
    environment: Arc<str>,
    host: Arc<str>,
    min_level: LogLevel,
    scope: Arc<Map<String, Value>>,
}

static LOGGER: OnceCell<Logger> = OnceCell::new();

pub fn init_logger(service: &'static str) -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(service))
}

/// Process-wide logger. Falls back to a default service name when
/// `init_logger` has not run yet (unit tests, library consumers).
pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(|| Logger::new(FALLBACK_SERVICE))
}

impl Logger {
    fn new(service: &'static str) -> Self {
        let environment = env::var("APP_ENV")
            .or_else(|_| env::var("RUST_ENV"))
            .unwrap_or_else(|_| "development".to_string());
        let host = get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .or_else(|| env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "unknown".to_string());
        let min_level = env::var("LOG_LEVEL")
            .ok()
            .map(|value| LogLevel::parse(&value))
            .unwrap_or(LogLevel::Info);

        Self {
            service: Arc::from(service),
            environment: Arc::from(environment),
            host: Arc::from(host),
            min_level,
            scope: Arc::new(Map::new()),
        }
    }

    /// Returns a logger that stamps `fields` onto every event it emits.
    /// Used to tie all pipeline events of one session together.
    pub fn scoped<T: Serialize>(&self, fields: T) -> Logger {
        let mut scope = (*self.scope).clone();
        if let Ok(Value::Object(map)) = serde_json::to_value(fields) {
            scope.extend(map);
        }
        Logger {
            scope: Arc::new(scope),
            ..self.clone()
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level <= self.min_level
    }

    fn render<T: Serialize>(&self, level: LogLevel, event: &str, context: T) -> Value {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let serialized = serde_json::to_value(context).unwrap_or(Value::Null);
        let mut payload = Map::new();
        payload.insert("timestamp".into(), Value::String(timestamp));
        payload.insert("service".into(), Value::String(self.service.to_string()));
        payload.insert("env".into(), Value::String(self.environment.to_string()));
        payload.insert("host".into(), Value::String(self.host.to_string()));
        payload.insert("level".into(), Value::String(level.as_str().to_string()));
        payload.insert("event".into(), Value::String(event.to_string()));
        for (key, value) in self.scope.iter() {
            payload.insert(key.clone(), value.clone());
        }

        match serialized {
            Value::Object(map) => {
                for (key, value) in map {
                    payload.insert(key, value);
                }
            }
            Value::Null => {}
            other => {
                payload.insert("context".into(), other);
            }
        }

        Value::Object(payload)
    }

    fn emit<T: Serialize>(&self, level: LogLevel, event: &str, context: T) {
        if !self.should_log(level) {
            return;
        }

        let line = self.render(level, event, context).to_string();
        match level {
            LogLevel::Error | LogLevel::Warn => eprintln!("{line}"),
            _ => println!("{line}"),
        }
    }

    pub fn debug<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Debug, event, context);
    }

    pub fn info<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Info, event, context);
    }

    pub fn warn<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Warn, event, context);
    }

    pub fn error<T: Serialize>(&self, event: &str, context: T) {
        self.emit(LogLevel::Error, event, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoped_fields_appear_on_every_event() {
        let base = Logger::new("test-service");
        let scoped = base.scoped(json!({ "sessionId": "abc" }));
        let line = scoped.render(LogLevel::Info, "session.state", json!({ "state": "resolving" }));

        assert_eq!(line["sessionId"], "abc");
        assert_eq!(line["state"], "resolving");
        assert_eq!(line["event"], "session.state");
        assert_eq!(line["service"], "test-service");
    }

    #[test]
    fn event_context_overrides_scope() {
        let scoped = Logger::new("test-service").scoped(json!({ "stage": "outer" }));
        let line = scoped.render(LogLevel::Warn, "x", json!({ "stage": "inner" }));
        assert_eq!(line["stage"], "inner");
        assert_eq!(line["level"], "warn");
    }

    #[test]
    fn non_object_context_is_nested() {
        let line = Logger::new("svc").render(LogLevel::Debug, "x", "plain");
        assert_eq!(line["context"], "plain");
    }

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(LogLevel::parse("WARNING"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Info);
    }
}
