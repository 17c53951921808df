//! Canonical workflow definition schema.
//!
//! A [`WorkflowDefinition`] is the parsed, immutable form of one reusable
//! test procedure: the typed input fields a caller must supply, the ordered
//! browser steps to run, and the dependency metadata the resolver uses to
//! pull prerequisite workflows into a plan. Definitions deserialize from the
//! JSON template format directly; the text format is handled by the engine's
//! parser, which produces the same structure.

use serde::{Deserialize, Serialize};

/// Complete, parsed description of one reusable test procedure.
///
/// Immutable once loaded into the registry; a reload replaces the whole
/// record (definitions are never merged field-by-field).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WorkflowDefinition {
    /// Canonical workflow identifier (for example, `create_fabric`).
    #[serde(rename = "workflow_id")]
    pub id: String,
    /// Human-readable title for menus and listings.
    #[serde(rename = "workflow_name", alias = "name", default)]
    pub name: String,
    /// Descriptive copy surfaced in detail panes.
    #[serde(default)]
    pub description: String,
    /// Coarse grouping used by listing and search (for example, `fabric`).
    #[serde(default = "default_category")]
    pub category: String,
    /// Rough wall-clock estimate for one run, in seconds.
    #[serde(default = "default_duration")]
    pub estimated_duration: u64,
    /// Workflow ids that must be planned before this one, in authoring order.
    #[serde(default, alias = "dependencies")]
    pub prerequisites: Vec<String>,
    /// Workflow ids includable conditionally via dependency questions.
    #[serde(default)]
    pub optional_dependencies: Vec<String>,
    /// Typed input fields, ids unique within this definition.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Ordered browser steps.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Questions the UI asks to decide optional-dependency inclusion.
    #[serde(default, alias = "validation_questions")]
    pub dependency_questions: Vec<DependencyQuestion>,
}

impl WorkflowDefinition {
    /// Looks up a field spec by id.
    pub fn field(&self, field_id: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }
}

fn default_category() -> String {
    "general".to_string()
}

const fn default_duration() -> u64 {
    300
}

/// A named, typed, validated input the caller must or may supply before a
/// workflow can run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FieldSpec {
    /// Identifier referenced by `{{field_id}}` placeholders in steps.
    pub field_id: String,
    /// Display label; falls back to the id when blank.
    #[serde(default)]
    pub label: String,
    /// Input type; drives which validation rules are meaningful.
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Whether a non-empty value must be present after defaults apply.
    #[serde(default)]
    pub required: bool,
    /// Default applied when the caller supplies no value; empty means none.
    #[serde(default)]
    pub default_value: String,
    /// Descriptive copy for form rendering.
    #[serde(default)]
    pub description: String,
    /// Declarative validation rules, interpreted per [`FieldType`].
    #[serde(default)]
    pub validation: ValidationRules,
    /// Allowed values for dropdown fields; empty means unconstrained.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Input field type tags.
///
/// Unknown tags are carried verbatim in [`FieldType::Other`] so definitions
/// authored against a newer vocabulary still load; validation treats them
/// as free text.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    #[default]
    Text,
    Textarea,
    Password,
    Number,
    Url,
    Ip,
    Boolean,
    Dropdown,
    Other(String),
}

impl From<String> for FieldType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "text" | "" => Self::Text,
            "textarea" => Self::Textarea,
            "password" => Self::Password,
            "number" => Self::Number,
            "url" => Self::Url,
            "ip" => Self::Ip,
            "boolean" | "checkbox" => Self::Boolean,
            "dropdown" | "select" => Self::Dropdown,
            _ => Self::Other(tag),
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => "text".into(),
            FieldType::Textarea => "textarea".into(),
            FieldType::Password => "password".into(),
            FieldType::Number => "number".into(),
            FieldType::Url => "url".into(),
            FieldType::Ip => "ip".into(),
            FieldType::Boolean => "boolean".into(),
            FieldType::Dropdown => "dropdown".into(),
            FieldType::Other(tag) => tag,
        }
    }
}

/// Declarative validation metadata attached to a field.
///
/// Which keys are meaningful depends on the field type: length and pattern
/// rules apply to the text family, `min`/`max` to numbers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression the value must match, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ValidationRules {
    /// True when no rule is set.
    pub fn is_empty(&self) -> bool {
        self.min_length.is_none() && self.max_length.is_none() && self.min.is_none() && self.max.is_none() && self.pattern.is_none()
    }
}

/// One atomic browser action within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StepSpec {
    /// Identifier unique within the owning definition (not globally).
    pub step_id: u32,
    /// What kind of browser action this step performs.
    pub action: StepAction,
    /// Human-readable description shown in timelines and logs.
    #[serde(default)]
    pub description: String,
    /// Locator expression; may contain `{{field_id}}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Input value; may contain `{{field_id}}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Human-readable success condition.
    #[serde(default)]
    pub verification: String,
    /// When true, a failure aborts the whole plan; otherwise the failure is
    /// recorded and execution continues.
    #[serde(default)]
    pub critical: bool,
    /// Explicit wait duration for `wait` steps, kept separate from the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_secs: Option<u64>,
}

/// Tagged step action vocabulary.
///
/// The text parser's classifier returns these variants rather than raw
/// strings so alternate prose grammars can be added without touching
/// callers. `Unknown` marks prose no keyword matched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum StepAction {
    Navigate,
    Click,
    Fill,
    #[default]
    Verify,
    Wait,
    Screenshot,
    Unknown,
}

impl From<String> for StepAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "navigate" => Self::Navigate,
            "click" | "select" | "press" => Self::Click,
            "fill" | "type" | "input" | "authenticate" => Self::Fill,
            "verify" | "assert" | "check" => Self::Verify,
            "wait" => Self::Wait,
            "screenshot" => Self::Screenshot,
            _ => Self::Unknown,
        }
    }
}

impl From<StepAction> for String {
    fn from(action: StepAction) -> Self {
        match action {
            StepAction::Navigate => "navigate".into(),
            StepAction::Click => "click".into(),
            StepAction::Fill => "fill".into(),
            StepAction::Verify => "verify".into(),
            StepAction::Wait => "wait".into(),
            StepAction::Screenshot => "screenshot".into(),
            StepAction::Unknown => "unknown".into(),
        }
    }
}

/// A yes/no question shown to the user whose answer decides whether an
/// optional dependency joins the plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DependencyQuestion {
    /// Text shown to the user.
    pub question: String,
    /// Boolean-fact id the answer is recorded under.
    pub field: String,
    /// Answer assumed when the fact is not supplied.
    #[serde(default)]
    pub default: bool,
    /// Directive applied when the fact is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_true: Option<QuestionDirective>,
    /// Directive applied when the fact is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_false: Option<QuestionDirective>,
}

/// Conditional directive attached to a dependency question.
///
/// The authoring format writes these as plain strings; `include_<id>` pulls
/// a workflow into the plan, anything else is surfaced as guidance text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum QuestionDirective {
    /// Include the named workflow ahead of the target.
    IncludeWorkflow(String),
    /// Free-form guidance shown to the user; does not affect resolution.
    Note(String),
}

impl From<String> for QuestionDirective {
    fn from(raw: String) -> Self {
        match raw.strip_prefix("include_") {
            Some(workflow_id) if !workflow_id.is_empty() => Self::IncludeWorkflow(workflow_id.to_string()),
            _ => Self::Note(raw),
        }
    }
}

impl From<QuestionDirective> for String {
    fn from(directive: QuestionDirective) -> Self {
        match directive {
            QuestionDirective::IncludeWorkflow(workflow_id) => format!("include_{workflow_id}"),
            QuestionDirective::Note(note) => note,
        }
    }
}
