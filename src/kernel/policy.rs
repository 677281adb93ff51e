//! Policy Engine: Bell-LaPadula mediation and label-mutation rules.
//!
//! One engine serves all three tranquility disciplines. The [`Mode`] is
//! chosen at construction and decides which label-mutation operations
//! exist and whether read/write may relabel the subject:
//!
//! | Mode          | `set_label` | override/restore | read/write adjust |
//! |---------------|-------------|------------------|-------------------|
//! | `Strict`      | upward only | no               | no                |
//! | `Overridable` | upward only | yes              | no                |
//! | `AutoAdjust`  | no          | no               | yes               |
//!
//! The decision primitives (no read up, no write down) are shared by all
//! modes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{Access, KernelError};
use super::label::{ClearanceScale, Label, Level};
use super::registry::{Listing, ObjectRecord, Registry, SubjectRecord};

// ── Configuration ──

/// Label-mutation discipline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Tranquility: permanent labels only move up.
    #[default]
    Strict,
    /// Strict plus explicit temporary downgrade and restore.
    Overridable,
    /// High/low-watermark: accesses relabel the subject instead of failing.
    AutoAdjust,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Overridable => f.write_str("overridable"),
            Self::AutoAdjust => f.write_str("auto_adjust"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "overridable" | "override" => Ok(Self::Overridable),
            "auto_adjust" | "auto-adjust" | "auto" => Ok(Self::AutoAdjust),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Star-property variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteRule {
    /// `object.level >= subject.level`.
    #[default]
    LevelOnly,
    /// Level rule plus identical category sets.
    CategoryExact,
}

impl fmt::Display for WriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LevelOnly => f.write_str("level_only"),
            Self::CategoryExact => f.write_str("category_exact"),
        }
    }
}

impl FromStr for WriteRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "level_only" | "level-only" => Ok(Self::LevelOnly),
            "category_exact" | "category-exact" => Ok(Self::CategoryExact),
            other => Err(format!("unknown write rule '{other}'")),
        }
    }
}

/// Everything that parameterises an engine.
#[derive(Debug, Clone, Default)]
pub struct PolicySettings {
    /// Label-mutation discipline.
    pub mode: Mode,
    /// Star-property variant.
    pub write_rule: WriteRule,
    /// Whether category sets take part in decisions.
    pub categories: bool,
    /// Clearance scale used for validation and display.
    pub scale: ClearanceScale,
}

// ── Results ──

/// Automatic relabel performed by an AUTO_ADJUST access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    /// Subject label before the access.
    pub from: Label,
    /// Subject label after the access.
    pub to: Label,
    /// Human-readable description for the caller.
    pub notice: String,
}

/// A granted read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGrant {
    /// Object id.
    pub object: String,
    /// Object label.
    pub label: Label,
    /// Relabel applied to reach this grant, if any.
    pub adjustment: Option<Adjustment>,
}

/// A granted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteGrant {
    /// Subject id.
    pub subject: String,
    /// Object id.
    pub object: String,
    /// Relabel applied to reach this grant, if any.
    pub adjustment: Option<Adjustment>,
}

/// Outcome of `restore_level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// Record after the restore.
    pub record: SubjectRecord,
    /// The override that was cleared; `None` when there was nothing to do.
    pub cleared: Option<Label>,
}

// ── Engine ──

/// Reference monitor decision and mutation logic over a shared [`Registry`].
#[derive(Debug)]
pub struct PolicyEngine {
    registry: Arc<Registry>,
    settings: PolicySettings,
}

impl PolicyEngine {
    /// Engine over `registry` with the given settings.
    pub fn new(registry: Arc<Registry>, settings: PolicySettings) -> Self {
        Self { registry, settings }
    }

    /// Active settings.
    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Active mode.
    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    /// Clearance scale.
    pub fn scale(&self) -> &ClearanceScale {
        &self.settings.scale
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    // ── Decision primitives ──

    /// Dominance under the configured category tracking.
    pub fn dominates(&self, a: &Label, b: &Label) -> bool {
        if self.settings.categories {
            a.dominates(b)
        } else {
            a.level >= b.level
        }
    }

    fn read_permitted(&self, subject: &Label, object: &Label) -> bool {
        self.dominates(subject, object)
    }

    fn write_permitted(&self, subject: &Label, object: &Label) -> bool {
        if object.level < subject.level {
            return false;
        }
        match self.settings.write_rule {
            WriteRule::LevelOnly => true,
            WriteRule::CategoryExact => {
                !self.settings.categories || object.categories == subject.categories
            }
        }
    }

    /// Simple security property: no read up.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::AccessDenied`] naming both labels.
    pub fn can_read(
        &self,
        subject: &str,
        subject_label: &Label,
        object: &str,
        object_label: &Label,
    ) -> Result<(), KernelError> {
        if self.read_permitted(subject_label, object_label) {
            return Ok(());
        }
        Err(self.denied(Access::Read, subject, subject_label, object, object_label))
    }

    /// Star property: no write down (category-exact when configured).
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::AccessDenied`] naming both labels.
    pub fn can_write(
        &self,
        subject: &str,
        subject_label: &Label,
        object: &str,
        object_label: &Label,
    ) -> Result<(), KernelError> {
        if self.write_permitted(subject_label, object_label) {
            return Ok(());
        }
        Err(self.denied(Access::Write, subject, subject_label, object, object_label))
    }

    fn denied(
        &self,
        access: Access,
        subject: &str,
        subject_label: &Label,
        object: &str,
        object_label: &Label,
    ) -> KernelError {
        let verb = match access {
            Access::Read => "read",
            Access::Write => "write to",
        };
        let detail = format!(
            "{subject} ({}) cannot {verb} {object} ({})",
            self.describe(subject_label),
            self.describe(object_label)
        );
        warn!(subject = %subject, object = %object, access = %access, "access denied");
        KernelError::AccessDenied {
            subject: subject.to_owned(),
            object: object.to_owned(),
            access,
            detail,
        }
    }

    /// Level name, with categories appended when they are tracked.
    pub fn describe(&self, label: &Label) -> String {
        let name = self.settings.scale.name(label.level);
        if !self.settings.categories || label.categories.is_empty() {
            return name;
        }
        let cats: Vec<&str> = label.categories.iter().map(String::as_str).collect();
        format!("{name} {{{}}}", cats.join(", "))
    }

    // ── Registration ──

    /// Validate a label against the scale and category tracking.
    ///
    /// # Errors
    ///
    /// [`KernelError::InvalidLevel`] for an out-of-scale level,
    /// [`KernelError::InvalidRequest`] for categories while tracking is off.
    pub fn admit(&self, label: &Label) -> Result<(), KernelError> {
        self.settings.scale.check(label.level)?;
        if !self.settings.categories && !label.categories.is_empty() {
            return Err(KernelError::InvalidRequest(
                "categories are not tracked by this monitor".to_owned(),
            ));
        }
        Ok(())
    }

    /// Insert or replace a subject.
    ///
    /// # Errors
    ///
    /// See [`PolicyEngine::admit`].
    pub fn add_subject(&self, id: &str, label: Label) -> Result<SubjectRecord, KernelError> {
        self.admit(&label)?;
        let record = self.registry.put_subject(id, label);
        info!(subject = %id, level = %self.describe(&record.original), "subject added");
        Ok(record)
    }

    /// Insert or replace an object.
    ///
    /// # Errors
    ///
    /// See [`PolicyEngine::admit`].
    pub fn add_object(&self, id: &str, label: Label) -> Result<ObjectRecord, KernelError> {
        self.admit(&label)?;
        let record = self.registry.put_object(id, label);
        info!(object = %id, level = %self.describe(&record.label), "object added");
        Ok(record)
    }

    // ── Tranquility ──

    /// Permanently relabel a subject. The new label must dominate the old.
    ///
    /// # Errors
    ///
    /// [`KernelError::NotFound`] for an unknown subject,
    /// [`KernelError::NotOffered`] in `AutoAdjust` mode,
    /// [`KernelError::TranquilityViolation`] for a downgrade.
    pub fn set_subject_label(&self, id: &str, label: Label) -> Result<SubjectRecord, KernelError> {
        self.admit(&label)?;
        let record = self.registry.transact(|tx| {
            let current = tx.subject(id)?;
            if self.settings.mode == Mode::AutoAdjust {
                return Err(KernelError::NotOffered {
                    operation: "set_label",
                    mode: self.settings.mode,
                });
            }
            if !self.dominates(&label, &current.original) {
                return Err(KernelError::TranquilityViolation {
                    id: id.to_owned(),
                    detail: format!(
                        "cannot lower '{id}' from {} to {}",
                        self.describe(&current.original),
                        self.describe(&label)
                    ),
                });
            }
            // An active override follows the new categories, matching what
            // the store rebuilds from the saved temporary level.
            let temporary = current.temporary.as_ref().map(|t| label.at_level(t.level));
            tx.set_label(id, label)?;
            match temporary {
                Some(temporary) => tx.set_temporary(id, Some(temporary)).cloned(),
                None => tx.subject(id).cloned(),
            }
        })?;
        info!(subject = %id, level = %self.describe(&record.original), "subject label raised");
        Ok(record)
    }

    // ── Override ──

    /// Install or replace a temporary downgrade to `level`.
    ///
    /// `level` must be strictly below the subject's original level. The
    /// override keeps the original categories.
    ///
    /// # Errors
    ///
    /// [`KernelError::InvalidLevel`] for an out-of-scale level,
    /// [`KernelError::NotFound`] for an unknown subject,
    /// [`KernelError::InvalidOverride`] outside `Overridable` mode or when
    /// `level` is not strictly lower.
    pub fn override_level(&self, id: &str, level: Level) -> Result<SubjectRecord, KernelError> {
        self.settings.scale.check(level)?;
        let record = self.registry.transact(|tx| {
            let current = tx.subject(id)?;
            self.require_overridable(id)?;
            if level >= current.original.level {
                return Err(KernelError::InvalidOverride {
                    id: id.to_owned(),
                    reason: format!(
                        "temporary level {} must be lower than original level {}",
                        self.settings.scale.name(level),
                        self.settings.scale.name(current.original.level)
                    ),
                });
            }
            let temporary = current.original.at_level(level);
            tx.set_temporary(id, Some(temporary)).cloned()
        })?;
        info!(
            subject = %id,
            original = %self.describe(&record.original),
            temporary = %self.describe(record.current()),
            "override installed"
        );
        Ok(record)
    }

    /// Clear any active override. Succeeds as a no-op when there is none.
    ///
    /// # Errors
    ///
    /// [`KernelError::NotFound`] for an unknown subject,
    /// [`KernelError::InvalidOverride`] outside `Overridable` mode.
    pub fn restore_level(&self, id: &str) -> Result<Restored, KernelError> {
        let restored = self.registry.transact(|tx| {
            let cleared = tx.subject(id)?.temporary.clone();
            self.require_overridable(id)?;
            let record = tx.set_temporary(id, None)?.clone();
            Ok(Restored { record, cleared })
        })?;
        if restored.cleared.is_some() {
            info!(subject = %id, level = %self.describe(&restored.record.original), "override restored");
        }
        Ok(restored)
    }

    fn require_overridable(&self, id: &str) -> Result<(), KernelError> {
        if self.settings.mode == Mode::Overridable {
            return Ok(());
        }
        Err(KernelError::InvalidOverride {
            id: id.to_owned(),
            reason: format!("overrides are not available in {} mode", self.settings.mode),
        })
    }

    // ── Mediated access ──

    /// Mediate a read.
    ///
    /// In `AutoAdjust` mode a read up is granted after raising the subject
    /// to the object's level (and categories, when tracked).
    ///
    /// # Errors
    ///
    /// [`KernelError::NotFound`] for unknown ids,
    /// [`KernelError::AccessDenied`] on a read up outside `AutoAdjust`.
    pub fn read(&self, subject: &str, object: &str) -> Result<ReadGrant, KernelError> {
        self.registry.transact(|tx| {
            let s = tx.subject(subject)?.current().clone();
            let o = tx.object(object)?.label.clone();

            let mut adjustment = None;
            if self.settings.mode != Mode::AutoAdjust {
                self.can_read(subject, &s, object, &o)?;
            } else if !self.read_permitted(&s, &o) {
                let raised = if self.settings.categories {
                    s.join(&o)
                } else {
                    s.at_level(s.level.max(o.level))
                };
                tx.set_label(subject, raised.clone())?;
                adjustment = Some(self.adjustment(subject, Access::Read, object, s, raised));
            }
            Ok(ReadGrant {
                object: object.to_owned(),
                label: o,
                adjustment,
            })
        })
    }

    /// Mediate a write.
    ///
    /// In `AutoAdjust` mode a write down is granted after lowering the
    /// subject to the object's level (and, under `CategoryExact`, adopting
    /// the object's categories).
    ///
    /// # Errors
    ///
    /// [`KernelError::NotFound`] for unknown ids,
    /// [`KernelError::AccessDenied`] on a write down outside `AutoAdjust`.
    pub fn write(&self, subject: &str, object: &str) -> Result<WriteGrant, KernelError> {
        self.registry.transact(|tx| {
            let s = tx.subject(subject)?.current().clone();
            let o = tx.object(object)?.label.clone();

            let mut adjustment = None;
            if self.settings.mode != Mode::AutoAdjust {
                self.can_write(subject, &s, object, &o)?;
            } else if !self.write_permitted(&s, &o) {
                let mut lowered = s.at_level(s.level.min(o.level));
                if self.settings.categories && self.settings.write_rule == WriteRule::CategoryExact
                {
                    lowered.categories = o.categories.clone();
                }
                tx.set_label(subject, lowered.clone())?;
                adjustment = Some(self.adjustment(subject, Access::Write, object, s, lowered));
            }
            Ok(WriteGrant {
                subject: subject.to_owned(),
                object: object.to_owned(),
                adjustment,
            })
        })
    }

    fn adjustment(
        &self,
        subject: &str,
        access: Access,
        object: &str,
        from: Label,
        to: Label,
    ) -> Adjustment {
        let direction = match to.level.cmp(&from.level) {
            std::cmp::Ordering::Greater => "raised",
            std::cmp::Ordering::Less => "lowered",
            std::cmp::Ordering::Equal => "changed",
        };
        let verb = match access {
            Access::Read => "read",
            Access::Write => "write to",
        };
        let notice = format!(
            "Level of '{subject}' automatically {direction} from {} to {} to {verb} '{object}'",
            self.describe(&from),
            self.describe(&to)
        );
        info!(subject = %subject, object = %object, access = %access, %notice, "subject label adjusted");
        Adjustment { from, to, notice }
    }

    // ── Listing ──

    /// Snapshot of all subjects.
    pub fn list_subjects(&self) -> Listing<SubjectRecord> {
        self.registry.list_subjects()
    }

    /// Snapshot of all objects.
    pub fn list_objects(&self) -> Listing<ObjectRecord> {
        self.registry.list_objects()
    }
}
