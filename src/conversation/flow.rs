//! Dialogue flow definitions
//!
//! A flow is an ordered list of steps. Each step names the field it fills,
//! the kind of input it expects and, for choice steps, the accepted tokens.

use crate::error::ValidationError;
use crate::types::{Field, FieldValue, FlowKind, InputKind, Lane, Prompt, Rank};
use std::str::FromStr;

/// Raw user input for the current step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Choice(String),
}

impl Input {
    pub fn kind(&self) -> InputKind {
        match self {
            Input::Text(_) => InputKind::FreeText,
            Input::Choice(_) => InputKind::Choice,
        }
    }
}

/// One step of a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub field: Field,
    pub input: InputKind,
    pub choices: Vec<String>,
    /// Character limit for free text; unused for choices
    pub max_chars: usize,
}

impl StepSpec {
    fn free_text(field: Field, max_chars: usize) -> Self {
        Self {
            field,
            input: InputKind::FreeText,
            choices: Vec::new(),
            max_chars,
        }
    }

    fn choice(field: Field, choices: Vec<String>) -> Self {
        Self {
            field,
            input: InputKind::Choice,
            choices,
            max_chars: 0,
        }
    }

    /// What the user should be asked for at this step
    pub fn prompt(&self) -> Prompt {
        Prompt {
            field: self.field,
            input: self.input,
            choices: self.choices.clone(),
        }
    }

    /// Validate input against this step and convert it to a field value
    pub fn validate(&self, input: &Input) -> Result<FieldValue, ValidationError> {
        match (self.input, input) {
            (InputKind::FreeText, Input::Text(text)) => self.validate_text(text),
            (InputKind::Choice, Input::Choice(token)) => self.validate_choice(token),
            (expected, _) => Err(ValidationError::new(
                self.field,
                format!("expected {} input", expected),
            )),
        }
    }

    fn validate_text(&self, text: &str) -> Result<FieldValue, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::new(self.field, "must not be empty"));
        }
        if text.starts_with('/') {
            return Err(ValidationError::new(self.field, "commands are not accepted here"));
        }
        if text.chars().any(char::is_control) {
            return Err(ValidationError::new(
                self.field,
                "must not contain control characters",
            ));
        }
        if text.chars().count() > self.max_chars {
            return Err(ValidationError::new(
                self.field,
                format!("must be at most {} characters", self.max_chars),
            ));
        }
        Ok(FieldValue::Text(text.to_string()))
    }

    fn validate_choice(&self, token: &str) -> Result<FieldValue, ValidationError> {
        let token = token.trim();
        let unknown = || {
            ValidationError::new(
                self.field,
                format!("'{}' is not one of: {}", token, self.choices.join(", ")),
            )
        };

        match self.field {
            Field::Lane | Field::Sublane | Field::DesiredLane => Lane::from_str(token)
                .map(FieldValue::Lane)
                .map_err(|_| unknown()),
            Field::Rank | Field::DesiredRank => Rank::from_str(token)
                .map(FieldValue::Rank)
                .map_err(|_| unknown()),
            Field::Nickname => Err(unknown()),
        }
    }
}

/// Ordered steps of one dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDefinition {
    pub kind: FlowKind,
    pub steps: Vec<StepSpec>,
}

impl FlowDefinition {
    /// Nickname, lane, sublane, rank
    pub fn registration(max_nickname_length: usize) -> Self {
        Self {
            kind: FlowKind::Registration,
            steps: vec![
                StepSpec::free_text(Field::Nickname, max_nickname_length),
                StepSpec::choice(Field::Lane, Lane::tokens()),
                StepSpec::choice(Field::Sublane, Lane::tokens()),
                StepSpec::choice(Field::Rank, Rank::tokens()),
            ],
        }
    }

    /// Desired lane, desired rank
    pub fn matchmaking_query() -> Self {
        Self {
            kind: FlowKind::MatchmakingQuery,
            steps: vec![
                StepSpec::choice(Field::DesiredLane, Lane::tokens()),
                StepSpec::choice(Field::DesiredRank, Rank::tokens()),
            ],
        }
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Every flow the engine can run
#[derive(Debug, Clone)]
pub struct FlowCatalog {
    registration: FlowDefinition,
    matchmaking_query: FlowDefinition,
}

impl FlowCatalog {
    pub fn new(max_nickname_length: usize) -> Self {
        Self {
            registration: FlowDefinition::registration(max_nickname_length),
            matchmaking_query: FlowDefinition::matchmaking_query(),
        }
    }

    pub fn get(&self, kind: FlowKind) -> &FlowDefinition {
        match kind {
            FlowKind::Registration => &self.registration,
            FlowKind::MatchmakingQuery => &self.matchmaking_query,
        }
    }
}

impl Default for FlowCatalog {
    fn default() -> Self {
        Self::new(32)
    }
}
