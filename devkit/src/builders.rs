/*!
Payload builders for Nagios events and snapshot replies

Shapes follow what the NagMQ broker module emits: events carry NEB field
names (`host_name`, `service_description`, ...), snapshot replies are a
single JSON object of `type`-tagged raw records.
*/

use serde_json::{json, Map, Value};

/// Result fields of a processed check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub state: i32,
    pub last_state: i32,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub output: String,
    pub last_check: i64,
}

impl CheckResult {
    /// First attempt out of 3, checked at 1700000000.
    pub fn new(state: i32, last_state: i32) -> Self {
        Self {
            state,
            last_state,
            current_attempt: 1,
            max_attempts: 3,
            output: format!("state {state}"),
            last_check: 1_700_000_000,
        }
    }

    pub fn attempt(mut self, current_attempt: i32) -> Self {
        self.current_attempt = current_attempt;
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn checked_at(mut self, last_check: i64) -> Self {
        self.last_check = last_check;
        self
    }

    fn fields(&self) -> Map<String, Value> {
        let value = json!({
            "state": self.state,
            "last_state": self.last_state,
            "last_hard_state": self.last_state,
            "current_attempt": self.current_attempt,
            "max_attempts": self.max_attempts,
            "output": self.output,
            "long_output": null,
            "perf_data": "",
            "last_check": self.last_check,
            "last_state_change": self.last_check,
        });
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Builds event payloads as published on the event topics.
pub struct NagiosEventBuilder;

impl NagiosEventBuilder {
    pub fn program_status(program_start: i64, now: i64) -> Value {
        json!({
            "type": "program_status",
            "program_start": program_start,
            "timestamp": { "tv_sec": now, "tv_usec": 0 },
            "pid": 4242,
        })
    }

    pub fn host_check_initiate(host: &str, last_state: Option<i32>, command_line: Option<&str>) -> Value {
        let mut event = json!({ "type": "host_check_initiate", "host_name": host });
        Self::with_initiate_fields(&mut event, last_state, command_line);
        event
    }

    pub fn service_check_initiate(host: &str, service: &str, last_state: Option<i32>, command_line: Option<&str>) -> Value {
        let mut event = json!({
            "type": "service_check_initiate",
            "host_name": host,
            "service_description": service,
        });
        Self::with_initiate_fields(&mut event, last_state, command_line);
        event
    }

    pub fn host_check_processed(host: &str, result: CheckResult) -> Value {
        let mut fields = result.fields();
        fields.insert("type".into(), json!("host_check_processed"));
        fields.insert("host_name".into(), json!(host));
        Value::Object(fields)
    }

    pub fn service_check_processed(host: &str, service: &str, result: CheckResult) -> Value {
        let mut fields = result.fields();
        fields.insert("type".into(), json!("service_check_processed"));
        fields.insert("host_name".into(), json!(host));
        fields.insert("service_description".into(), json!(service));
        Value::Object(fields)
    }

    fn with_initiate_fields(event: &mut Value, last_state: Option<i32>, command_line: Option<&str>) {
        if let Some(state) = last_state {
            event["last_state"] = json!(state);
        }
        if let Some(cmd) = command_line {
            event["command_line"] = json!(cmd);
        }
    }
}

/// Builds a snapshot reply object.
#[derive(Debug, Default, Clone)]
pub struct SnapshotBuilder {
    records: Map<String, Value>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host record; `extra` fields are merged over the defaults.
    pub fn host_record(mut self, host: &str, extra: Value) -> Self {
        let mut record = json!({
            "type": "host",
            "host_name": host,
            "current_state": 0,
            "last_state": 0,
            "last_hard_state": 0,
            "plugin_output": "PING OK",
            "current_attempt": 1,
            "max_attempts": 3,
            "last_check": 1_700_000_000,
            "last_time_up": 1_700_000_000,
            "is_flapping": 0,
            "problem_has_been_acknowledged": 0,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut record, extra) {
            base.extend(extra);
        }
        self.records.insert(host.to_string(), record);
        self
    }

    pub fn service(mut self, host: &str, service: &str, state: i32) -> Self {
        let record = json!({
            "type": "service",
            "host_name": host,
            "service_description": service,
            "current_state": state,
            "last_state": state,
            "last_hard_state": state,
            "plugin_output": format!("{service} state {state}"),
            "current_attempt": 1,
            "max_attempts": 3,
            "last_check": 1_700_000_000,
            "last_time_ok": if state == 0 { 1_700_000_000 } else { 0 },
            "is_flapping": false,
            "problem_has_been_acknowledged": false,
        });
        self.records.insert(format!("{host};{service}"), record);
        self
    }

    /// Adds hosts `host-0` .. `host-{count-1}`, all up.
    pub fn hosts(self, count: usize) -> Self {
        (0..count).fold(self, |builder, i| builder.host_record(&format!("host-{i}"), json!({})))
    }

    /// Adds `count` ok services to `host`.
    pub fn services(self, host: &str, count: usize) -> Self {
        (0..count).fold(self, |builder, i| builder.service(host, &format!("svc-{i}"), 0))
    }

    pub fn build(self) -> Map<String, Value> {
        self.records
    }

    pub fn to_bytes(self) -> Vec<u8> {
        serde_json::to_vec(&Value::Object(self.records)).unwrap_or_default()
    }
}
