use crate::context::BuildContext;
use crate::spec::ImageSpec;
use crate::validation::rules::{
    AbsoluteWorkdirRule, CopySourcesRule, EntrypointExistsRule, EnvNamesRule, RequiredFieldsRule,
    RuntimeFlagsRule, StepOrderRule, ValidImageNameRule, ValidationRule,
};
use anyhow::Result;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Runs every rule in order, stopping at the first failure
    ///
    /// Context-dependent rules are skipped when `context` is `None`.
    pub fn validate(&self, spec: &ImageSpec, context: Option<&BuildContext>) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(spec, context) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(ValidImageNameRule),
                Box::new(AbsoluteWorkdirRule),
                Box::new(StepOrderRule),
                Box::new(EnvNamesRule),
                Box::new(RuntimeFlagsRule),
                Box::new(CopySourcesRule),
                Box::new(EntrypointExistsRule),
            ],
        }
    }
}
