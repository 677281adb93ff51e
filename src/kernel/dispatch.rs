//! Request Dispatcher: maps `(action, params)` onto kernel calls.
//!
//! Parsing is separate from execution. [`Dispatcher::parse`] validates the
//! shape of the parameters and produces a typed [`Command`] before any
//! kernel method runs; [`Dispatcher::execute`] performs it. Either side's
//! failure becomes an error [`Response`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::error::KernelError;
use super::label::{Label, Level};
use super::policy::{Mode, PolicyEngine};

/// Action names the dispatcher recognises.
pub const ACTIONS: &[&str] = &[
    "add_subject",
    "add_object",
    "set_label",
    "override_level",
    "restore_level",
    "read",
    "write",
    "list_subjects",
    "list_objects",
];

// ---------------------------------------------------------------------------
// Wire envelope
// ---------------------------------------------------------------------------

/// One inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Action name.
    pub action: String,
    /// Parameter bag; absent or `null` means `{}`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    /// Build a request.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }
}

/// Uniform result envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// Success carrying a result value.
    Ok {
        /// Action-specific payload.
        result: Value,
    },
    /// Failure carrying a human-readable message.
    Error {
        /// Message for the caller.
        error: String,
        /// Machine-readable condition code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
}

impl Response {
    /// Success envelope.
    pub fn ok(result: Value) -> Self {
        Self::Ok { result }
    }

    /// Error envelope with an explicit code.
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            kind: Some(kind.to_owned()),
        }
    }

    /// Whether this is a success envelope.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

impl From<KernelError> for Response {
    fn from(err: KernelError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

impl From<Result<Value, KernelError>> for Response {
    fn from(result: Result<Value, KernelError>) -> Self {
        match result {
            Ok(result) => Self::ok(result),
            Err(err) => err.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert or replace a subject.
    AddSubject {
        /// Subject id.
        id: String,
        /// Initial label.
        label: Label,
    },
    /// Insert or replace an object.
    AddObject {
        /// Object id.
        id: String,
        /// Object label.
        label: Label,
    },
    /// Permanent upward relabel.
    SetLabel {
        /// Subject id.
        id: String,
        /// New label.
        label: Label,
    },
    /// Temporary downgrade.
    OverrideLevel {
        /// Subject id.
        id: String,
        /// Temporary level.
        level: Level,
    },
    /// Clear a temporary downgrade.
    RestoreLevel {
        /// Subject id.
        id: String,
    },
    /// Mediated read.
    Read {
        /// Subject id.
        subject: String,
        /// Object id.
        object: String,
    },
    /// Mediated write.
    Write {
        /// Subject id.
        subject: String,
        /// Object id.
        object: String,
    },
    /// Subject summary.
    ListSubjects,
    /// Object summary.
    ListObjects,
}

impl Command {
    /// Canonical action name.
    pub fn action(&self) -> &'static str {
        match self {
            Self::AddSubject { .. } => "add_subject",
            Self::AddObject { .. } => "add_object",
            Self::SetLabel { .. } => "set_label",
            Self::OverrideLevel { .. } => "override_level",
            Self::RestoreLevel { .. } => "restore_level",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::ListSubjects => "list_subjects",
            Self::ListObjects => "list_objects",
        }
    }
}

/// Registry record a successful command may have changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Touched {
    /// A subject record.
    Subject(String),
    /// An object record.
    Object(String),
}

// ---------------------------------------------------------------------------
// Parameter access
// ---------------------------------------------------------------------------

struct Params<'a>(&'a Map<String, Value>);

impl<'a> Params<'a> {
    fn from_value(value: &'a Value, empty: &'a Map<String, Value>) -> Result<Self, KernelError> {
        match value {
            Value::Null => Ok(Self(empty)),
            Value::Object(map) => Ok(Self(map)),
            _ => Err(KernelError::InvalidRequest(
                "params must be a JSON object".to_owned(),
            )),
        }
    }

    fn id(&self, key: &str) -> Result<String, KernelError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(KernelError::InvalidRequest(format!(
                "missing parameter '{key}'"
            ))),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(_) => Err(KernelError::InvalidRequest(format!(
                "parameter '{key}' must be a non-empty string"
            ))),
        }
    }

    fn level(&self, key: &str, engine: &PolicyEngine) -> Result<Level, KernelError> {
        let value = self.0.get(key).ok_or_else(|| {
            KernelError::InvalidRequest(format!("missing parameter '{key}'"))
        })?;
        if let Some(raw) = value.as_i64() {
            return engine.scale().level(raw);
        }
        if let Some(raw) = value.as_u64() {
            return Err(KernelError::InvalidLevel {
                level: i128::from(raw),
                max: engine.scale().max(),
            });
        }
        Err(KernelError::InvalidRequest(format!(
            "parameter '{key}' must be an integer"
        )))
    }

    fn categories(&self, key: &str) -> Result<BTreeSet<String>, KernelError> {
        let items = match self.0.get(key) {
            None | Some(Value::Null) => return Ok(BTreeSet::new()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(KernelError::InvalidRequest(format!(
                    "parameter '{key}' must be a list of strings"
                )))
            }
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
                _ => Err(KernelError::InvalidRequest(format!(
                    "parameter '{key}' must contain only non-empty strings"
                ))),
            })
            .collect()
    }

    fn label(&self, engine: &PolicyEngine) -> Result<Label, KernelError> {
        Ok(Label {
            level: self.level("level", engine)?,
            categories: self.categories("categories")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Stateless front door to the kernel.
#[derive(Debug)]
pub struct Dispatcher {
    engine: PolicyEngine,
}

impl Dispatcher {
    /// Dispatcher driving `engine`.
    pub fn new(engine: PolicyEngine) -> Self {
        Self { engine }
    }

    /// The engine behind this dispatcher.
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Parse, execute, and wrap one request.
    pub fn dispatch(&self, action: &str, params: &Value) -> Response {
        let result = self
            .parse(action, params)
            .and_then(|command| self.execute(&command));
        if let Err(ref err) = result {
            debug!(action = %action, code = err.code(), error = %err, "request failed");
        }
        result.into()
    }

    /// [`Dispatcher::dispatch`] for a decoded [`Request`].
    pub fn handle(&self, request: &Request) -> Response {
        self.dispatch(&request.action, &request.params)
    }

    /// Validate an action and its parameters.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnknownAction`] for an unrecognised action,
    /// [`KernelError::InvalidRequest`] or [`KernelError::InvalidLevel`] for
    /// bad parameters.
    pub fn parse(&self, action: &str, params: &Value) -> Result<Command, KernelError> {
        if !ACTIONS.contains(&action) && action != "set_level" {
            return Err(KernelError::UnknownAction(action.to_owned()));
        }
        let empty = Map::new();
        let p = Params::from_value(params, &empty)?;
        let engine = &self.engine;

        let command = match action {
            "add_subject" => Command::AddSubject {
                id: p.id("id")?,
                label: p.label(engine)?,
            },
            "add_object" => Command::AddObject {
                id: p.id("id")?,
                label: p.label(engine)?,
            },
            "set_label" | "set_level" => Command::SetLabel {
                id: p.id("id")?,
                label: p.label(engine)?,
            },
            "override_level" => Command::OverrideLevel {
                id: p.id("sid")?,
                level: p.level("level", engine)?,
            },
            "restore_level" => Command::RestoreLevel { id: p.id("sid")? },
            "read" => Command::Read {
                subject: p.id("subj_id")?,
                object: p.id("obj_id")?,
            },
            "write" => Command::Write {
                subject: p.id("subj_id")?,
                object: p.id("obj_id")?,
            },
            "list_subjects" => Command::ListSubjects,
            "list_objects" => Command::ListObjects,
            other => return Err(KernelError::UnknownAction(other.to_owned())),
        };
        Ok(command)
    }

    /// Run a validated command and build its result payload.
    ///
    /// # Errors
    ///
    /// Whatever the policy engine raises for the command.
    pub fn execute(&self, command: &Command) -> Result<Value, KernelError> {
        let engine = &self.engine;
        let scale = engine.scale();
        match command {
            Command::AddSubject { id, label } => {
                let record = engine.add_subject(id, label.clone())?;
                Ok(json!(format!(
                    "Subject '{id}' added with level {}",
                    engine.describe(&record.original)
                )))
            }
            Command::AddObject { id, label } => {
                let record = engine.add_object(id, label.clone())?;
                Ok(json!(format!(
                    "Object '{id}' added with level {}",
                    engine.describe(&record.label)
                )))
            }
            Command::SetLabel { id, label } => {
                let record = engine.set_subject_label(id, label.clone())?;
                Ok(json!(format!(
                    "Level of '{id}' changed to {}",
                    engine.describe(&record.original)
                )))
            }
            Command::OverrideLevel { id, level } => {
                let record = engine.override_level(id, *level)?;
                Ok(json!(format!(
                    "Level of '{id}' temporarily lowered to {} (original: {})",
                    scale.name(record.current().level),
                    scale.name(record.original.level)
                )))
            }
            Command::RestoreLevel { id } => {
                let restored = engine.restore_level(id)?;
                let level = scale.name(restored.record.original.level);
                let message = match restored.cleared {
                    Some(_) => format!("Level of '{id}' restored to {level}"),
                    None => format!("'{id}' has no active override; level remains {level}"),
                };
                Ok(json!(message))
            }
            Command::Read { subject, object } => {
                let grant = engine.read(subject, object)?;
                let mut payload = Map::new();
                payload.insert("object".to_owned(), json!(grant.object));
                payload.insert("label".to_owned(), self.label_json(&grant.label));
                if let Some(adjustment) = grant.adjustment {
                    payload.insert("notice".to_owned(), json!(adjustment.notice));
                }
                Ok(Value::Object(payload))
            }
            Command::Write { subject, object } => {
                let grant = engine.write(subject, object)?;
                let message = format!("{} wrote to {}.", grant.subject, grant.object);
                Ok(match grant.adjustment {
                    Some(adjustment) => json!({ "result": message, "notice": adjustment.notice }),
                    None => json!(message),
                })
            }
            Command::ListSubjects => Ok(self.subjects_json()),
            Command::ListObjects => Ok(self.objects_json()),
        }
    }

    /// Record a successful `command` may have changed, for write-back.
    pub fn touched(&self, command: &Command) -> Option<Touched> {
        match command {
            Command::AddSubject { id, .. }
            | Command::SetLabel { id, .. }
            | Command::OverrideLevel { id, .. }
            | Command::RestoreLevel { id } => Some(Touched::Subject(id.clone())),
            Command::AddObject { id, .. } => Some(Touched::Object(id.clone())),
            Command::Read { subject, .. } | Command::Write { subject, .. } => {
                (self.engine.mode() == Mode::AutoAdjust).then(|| Touched::Subject(subject.clone()))
            }
            Command::ListSubjects | Command::ListObjects => None,
        }
    }

    // ── Payload builders ──

    fn tracks_categories(&self) -> bool {
        self.engine.settings().categories
    }

    fn categories_json(label: &Label) -> Value {
        json!(label.categories.iter().collect::<Vec<_>>())
    }

    fn label_json(&self, label: &Label) -> Value {
        let mut out = Map::new();
        out.insert("level".to_owned(), json!(label.level.rank()));
        if self.tracks_categories() {
            out.insert("categories".to_owned(), Self::categories_json(label));
        }
        Value::Object(out)
    }

    fn subjects_json(&self) -> Value {
        let scale = self.engine.scale();
        let overridable = self.engine.mode() == Mode::Overridable;
        let mut out = Map::new();
        for (id, record) in self.engine.list_subjects().iter() {
            let mut entry = Map::new();
            if overridable {
                entry.insert(
                    "original_level".to_owned(),
                    json!(scale.name(record.original.level)),
                );
                entry.insert(
                    "current_level".to_owned(),
                    json!(scale.name(record.current().level)),
                );
                if let Some(temporary) = &record.temporary {
                    entry.insert(
                        "temporary_level".to_owned(),
                        json!(scale.name(temporary.level)),
                    );
                }
            } else {
                entry.insert("level".to_owned(), json!(scale.name(record.current().level)));
            }
            if self.tracks_categories() {
                entry.insert("categories".to_owned(), Self::categories_json(record.current()));
            }
            out.insert(id.to_owned(), Value::Object(entry));
        }
        Value::Object(out)
    }

    fn objects_json(&self) -> Value {
        let scale = self.engine.scale();
        let mut out = Map::new();
        for (id, record) in self.engine.list_objects().iter() {
            let mut entry = Map::new();
            entry.insert("level".to_owned(), json!(scale.name(record.label.level)));
            if self.tracks_categories() {
                entry.insert("categories".to_owned(), Self::categories_json(&record.label));
            }
            out.insert(id.to_owned(), Value::Object(entry));
        }
        Value::Object(out)
    }
}
