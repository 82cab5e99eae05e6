//! Validation System - Template Contract Rules
//!
//! Rules produce structured violations.
//! The registry admits a template only when no rule reports an error.

use serde::{Deserialize, Serialize};

use crate::templates::{Placeholder, Template};
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub template_id: String,
    pub template_version: String,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn error_summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub(crate) fn rejected_as_duplicate(mut self) -> Self {
        self.violations.push(ValidationViolation {
            rule: "unique_id".to_string(),
            severity: ViolationSeverity::Error,
            message: format!("template id `{}` is already registered", self.template_id),
            expected: None,
            actual: None,
            remediation: vec!["Give each template descriptor a distinct id".to_string()],
        });
        self.valid = false;
        self
    }
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, template: &Template) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct PlaceholderContractRule;

impl ValidationRule for PlaceholderContractRule {
    fn name(&self) -> &'static str { "placeholder_contract" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        template
            .missing_placeholders()
            .into_iter()
            .map(|p| ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: format!("markup does not contain {}", p),
                expected: Some(p.token().to_string()),
                actual: None,
                remediation: vec![format!("Add {} to the template markup", p)],
            })
            .collect()
    }
}

pub struct EngineVersionRule;

impl ValidationRule for EngineVersionRule {
    fn name(&self) -> &'static str { "engine_version" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        let min = match semver::Version::parse(&template.engine_min_version) {
            Ok(v) => v,
            Err(e) => {
                return vec![ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Error,
                    message: format!("engineMinVersion is not a semantic version: {}", e),
                    expected: Some("MAJOR.MINOR.PATCH".to_string()),
                    actual: Some(template.engine_min_version.clone()),
                    remediation: vec!["Use a version such as 1.0.0".to_string()],
                }];
            }
        };

        match semver::Version::parse(ENGINE_VERSION) {
            Ok(engine) if engine >= min => vec![],
            _ => vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: "template requires a newer engine".to_string(),
                expected: Some(format!(">= {}", min)),
                actual: Some(ENGINE_VERSION.to_string()),
                remediation: vec!["Upgrade deckforge or use an older template".to_string()],
            }],
        }
    }
}

pub struct CardSizeRule;

const MAX_CARD_EDGE: u32 = 4096;

impl ValidationRule for CardSizeRule {
    fn name(&self) -> &'static str { "card_size" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        let [w, h] = template.card_size;
        if w == 0 || h == 0 {
            return vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: "card size must be non-zero".to_string(),
                expected: Some("width and height > 0".to_string()),
                actual: Some(format!("{}x{}", w, h)),
                remediation: vec!["Set cardSize, e.g. [428, 571]".to_string()],
            }];
        }
        if w > MAX_CARD_EDGE || h > MAX_CARD_EDGE {
            return vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Warning,
                message: "card size is unusually large".to_string(),
                expected: Some(format!("<= {}px per edge", MAX_CARD_EDGE)),
                actual: Some(format!("{}x{}", w, h)),
                remediation: vec!["Rendering may be slow".to_string()],
            }];
        }
        vec![]
    }
}

/// Rejects `{{TOKEN}}`s outside the contract; nothing would ever substitute them.
pub struct UnknownTokenRule;

impl ValidationRule for UnknownTokenRule {
    fn name(&self) -> &'static str { "unknown_token" }

    fn validate(&self, template: &Template) -> Vec<ValidationViolation> {
        let known: Vec<&str> = Placeholder::ALL.iter().map(|p| p.token()).collect();
        let mut violations = vec![];
        let mut rest = template.markup.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start..];
            let Some(end) = after.find("}}") else { break };
            let token = &after[..end + 2];
            if !known.contains(&token) {
                violations.push(ValidationViolation {
                    rule: self.name().to_string(),
                    severity: ViolationSeverity::Error,
                    message: format!("{} is not part of the placeholder contract", token),
                    expected: None,
                    actual: Some(token.to_string()),
                    remediation: vec!["Remove the token or rename it to a contract slot".to_string()],
                });
            }
            rest = &after[end + 2..];
        }
        violations
    }
}

/// Validator runs every rule; any error makes the template invalid
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(PlaceholderContractRule),
                Box::new(EngineVersionRule),
                Box::new(CardSizeRule),
                Box::new(UnknownTokenRule),
            ],
        }
    }

    pub fn validate(&self, template: &Template) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(template))
            .collect();

        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult {
            valid,
            violations,
            template_id: template.id.clone(),
            template_version: template.template_version.clone(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
