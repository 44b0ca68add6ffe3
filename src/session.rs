//! Assistant-session events and per-session counters.
//!
//! The daemon does not read session logs itself; events are pushed in
//! (over IPC or by an embedding program) and applied by the app.

use serde::{Deserialize, Serialize};

/// Focused reads span fewer lines than this.
pub const FOCUSED_READ_MAX_LINES: i64 = 500;
/// A read that skips at least this share of the file counts as guided.
pub const GUIDED_SAVINGS_PCT: u64 = 50;
/// Estimated tokens per line read, and bytes per token.
const TOKENS_PER_LINE: u64 = 20;
const BYTES_PER_TOKEN: u64 = 4;

// ─── Events ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ToolCall {
    /// "Read", "Grep", "Bash", ...
    pub name: String,
    pub pattern: String,
    pub command: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FileRef {
    pub path: String,
    pub offset: i64,
    pub limit: i64,
    /// read, write, edit, search, glob
    pub action: String,
}

impl FileRef {
    /// A partial read of fewer than [`FOCUSED_READ_MAX_LINES`] lines.
    pub fn is_focused_read(&self) -> bool {
        self.action == "read" && self.limit > 0 && self.limit < FOCUSED_READ_MAX_LINES
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    UserInput {
        #[serde(default)]
        text: String,
    },
    AiThinking {
        #[serde(default)]
        text: String,
    },
    AiResponse {
        #[serde(default)]
        text: String,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    ToolInvocation {
        #[serde(default)]
        tool: ToolCall,
        #[serde(default)]
        file: Option<FileRef>,
    },
    ToolResult {
        #[serde(default)]
        text: String,
    },
    SystemMeta {
        #[serde(default)]
        text: String,
    },
}

/// One atomic event of an assistant session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    #[serde(default)]
    pub session_id: String,
    /// Seconds since epoch; 0 when unknown.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

// ─── Summaries ───────────────────────────────────────────────────────

/// Persisted counters of one session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub prompt_count: u32,
    pub read_count: u32,
    pub guided_read_count: u32,
    pub guided_ratio: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

/// Whether reading `limit` lines of a `file_size`-byte file saves at least
/// [`GUIDED_SAVINGS_PCT`] of the tokens a full read would cost.
pub fn is_guided_read(file_size: u64, limit: i64) -> bool {
    if limit <= 0 || file_size == 0 {
        return false;
    }
    let file_tokens = (file_size / BYTES_PER_TOKEN).max(1);
    let read_tokens = limit as u64 * TOKENS_PER_LINE;
    if read_tokens >= file_tokens {
        return false;
    }
    let pct = (file_tokens - read_tokens) * 100 / file_tokens;
    (GUIDED_SAVINGS_PCT..=99).contains(&pct)
}

// ─── Tracker ─────────────────────────────────────────────────────────

/// Counters of the session currently being observed.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    current: SessionSummary,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the active session, if any event carried one.
    pub fn current_id(&self) -> Option<&str> {
        Some(self.current.session_id.as_str()).filter(|id| !id.is_empty())
    }

    /// Whether `session_id` starts a different session than the active one.
    pub fn is_boundary(&self, session_id: &str) -> bool {
        !session_id.is_empty() && self.current_id() != Some(session_id)
    }

    /// Switch to `session_id`, continuing from `restored` counters when the
    /// session was seen before.
    pub fn begin(&mut self, session_id: &str, timestamp: i64, restored: Option<SessionSummary>) {
        self.current = match restored {
            Some(mut s) => {
                s.session_id = session_id.to_string();
                s
            }
            None => SessionSummary {
                session_id: session_id.to_string(),
                start_time: timestamp,
                ..Default::default()
            },
        };
    }

    pub fn record_prompt(&mut self) {
        self.current.prompt_count = self.current.prompt_count.saturating_add(1);
    }

    pub fn record_read(&mut self, guided: bool) {
        self.current.read_count = self.current.read_count.saturating_add(1);
        if guided {
            self.current.guided_read_count = self.current.guided_read_count.saturating_add(1);
        }
    }

    pub fn record_usage(&mut self, usage: &TokenUsage) {
        let c = &mut self.current;
        c.input_tokens = c.input_tokens.saturating_add(usage.input_tokens);
        c.output_tokens = c.output_tokens.saturating_add(usage.output_tokens);
        c.cache_read_tokens = c.cache_read_tokens.saturating_add(usage.cache_read_tokens);
        c.cache_write_tokens = c.cache_write_tokens.saturating_add(usage.cache_write_tokens);
    }

    /// Snapshot for persistence, `None` before any session started.
    pub fn summary(&self, now: i64) -> Option<SessionSummary> {
        self.current_id()?;
        let mut s = self.current.clone();
        s.end_time = now;
        s.guided_ratio = if s.read_count > 0 {
            s.guided_read_count as f64 / s.read_count as f64
        } else {
            0.0
        };
        Some(s)
    }

    pub fn reset(&mut self) {
        self.current = SessionSummary::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let json = r#"{"session_id":"s1","timestamp":5,"kind":"tool_invocation",
            "tool":{"name":"Read"},"file":{"path":"/p/a.go","limit":40,"action":"read"}}"#;
        let ev: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.session_id, "s1");
        match ev.kind {
            SessionEventKind::ToolInvocation { tool, file } => {
                assert_eq!(tool.name, "Read");
                assert!(file.unwrap().is_focused_read());
            }
            other => panic!("unexpected {:?}", other),
        }

        let ev: SessionEvent = serde_json::from_str(r#"{"kind":"user_input","text":"hi"}"#).unwrap();
        assert_eq!(ev.kind, SessionEventKind::UserInput { text: "hi".to_string() });
        assert!(ev.session_id.is_empty());
    }

    #[test]
    fn test_focused_read_gate() {
        let read = |limit, action: &str| FileRef {
            path: "a".to_string(),
            offset: 0,
            limit,
            action: action.to_string(),
        };
        assert!(read(1, "read").is_focused_read());
        assert!(read(499, "read").is_focused_read());
        assert!(!read(500, "read").is_focused_read());
        assert!(!read(0, "read").is_focused_read());
        assert!(!read(10, "edit").is_focused_read());
    }

    #[test]
    fn test_guided_read() {
        // 40_000 bytes ≈ 10_000 tokens; 50 lines ≈ 1_000 tokens → 90%
        assert!(is_guided_read(40_000, 50));
        // 250 lines ≈ 5_000 tokens → exactly 50%
        assert!(is_guided_read(40_000, 250));
        assert!(!is_guided_read(40_000, 251));
        assert!(!is_guided_read(400, 10));
        assert!(!is_guided_read(0, 10));
        assert!(!is_guided_read(40_000, 0));
    }

    #[test]
    fn test_tracker_counts_and_ratio() {
        let mut t = SessionTracker::new();
        assert!(t.summary(10).is_none());
        assert!(t.is_boundary("a"));
        assert!(!t.is_boundary(""));

        t.begin("a", 100, None);
        assert!(!t.is_boundary("a"));
        t.record_prompt();
        t.record_read(true);
        t.record_read(false);
        t.record_usage(&TokenUsage {
            input_tokens: 10,
            output_tokens: 3,
            ..Default::default()
        });

        let s = t.summary(160).unwrap();
        assert_eq!(s.session_id, "a");
        assert_eq!(s.start_time, 100);
        assert_eq!(s.end_time, 160);
        assert_eq!(s.prompt_count, 1);
        assert_eq!(s.read_count, 2);
        assert_eq!(s.guided_ratio, 0.5);
        assert_eq!(s.input_tokens, 10);
    }

    #[test]
    fn test_tracker_restores_previous_counters() {
        let mut t = SessionTracker::new();
        let prior = SessionSummary {
            session_id: "b".to_string(),
            start_time: 7,
            prompt_count: 4,
            read_count: 2,
            ..Default::default()
        };
        t.begin("b", 999, Some(prior));
        t.record_prompt();
        let s = t.summary(1000).unwrap();
        assert_eq!(s.start_time, 7);
        assert_eq!(s.prompt_count, 5);
        assert_eq!(s.read_count, 2);
    }
}
