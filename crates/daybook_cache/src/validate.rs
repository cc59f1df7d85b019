//! Property and type validation.
//!
//! Validation never throws: rules return the problems they found and the
//! cache stores them per entity, queryable through
//! [`crate::EntityCache::errors`]. Saving refuses entities that carry
//! errors, but nothing stops an application from holding invalid state in
//! the cache while the user keeps editing.
//!
//! Rules come from two places: implicit rules derived from property facts
//! (required, max length) and named configurations in the metadata
//! document, instantiated through a [`RuleRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use daybook_foundation::{DataType, Error, Result, Value};

/// One problem a validation rule found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Stable name of the rule that produced this error.
    pub rule_name: Arc<str>,
    /// The offending property, dotted for nested complex members. `None`
    /// for type-level rules.
    pub property: Option<Arc<str>>,
    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    /// Creates an error for a property-level rule.
    #[must_use]
    pub fn on_property(
        rule_name: impl Into<Arc<str>>,
        property: impl Into<Arc<str>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            property: Some(property.into()),
            message: message.into(),
        }
    }

    /// Creates an error for a type-level rule.
    #[must_use]
    pub fn on_type(rule_name: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            property: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(p) => write!(f, "[{}] {}: {}", self.rule_name, p, self.message),
            None => write!(f, "[{}] {}", self.rule_name, self.message),
        }
    }
}

/// What a rule sees when it runs.
pub struct ValidationContext<'a> {
    /// Full name of the entity type under validation.
    pub entity_type: &'a str,
    /// The property under validation, dotted for nested complex members.
    /// `None` when a type-level rule runs.
    pub property: Option<&'a str>,
    /// The current value of the property, or nil for type-level rules.
    pub value: &'a Value,
}

impl ValidationContext<'_> {
    /// The property name, or the entity type name for type-level rules.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.property.unwrap_or(self.entity_type)
    }
}

/// A validation rule.
///
/// Rules are pure: they inspect the context and describe problems, never
/// mutate anything, and never fail. A rule that cannot run against the
/// value it was given reports nothing.
pub trait ValidationRule: fmt::Debug {
    /// Stable name, used in configurations and error reports.
    fn name(&self) -> &str;

    /// Inspects the context and returns every problem found.
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationError>;
}

/// Rejects nil values.
#[derive(Debug, Clone, Copy)]
pub struct Required;

impl ValidationRule for Required {
    fn name(&self) -> &str {
        "required"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
        if ctx.value.is_nil() {
            vec![ValidationError::on_property(
                self.name(),
                ctx.subject(),
                "a value is required",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Rejects strings longer than a declared maximum.
#[derive(Debug, Clone, Copy)]
pub struct MaxLength {
    /// Longest acceptable string, in characters.
    pub max: usize,
}

impl ValidationRule for MaxLength {
    fn name(&self) -> &str {
        "maxLength"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
        match ctx.value.as_str() {
            Some(s) if s.chars().count() > self.max => {
                vec![ValidationError::on_property(
                    self.name(),
                    ctx.subject(),
                    format!("must be {} characters or fewer", self.max),
                )]
            }
            _ => Vec::new(),
        }
    }
}

/// Rejects values whose shape disagrees with a declared data type.
///
/// Stored values are coerced on write, so this mostly matters for rules
/// applied to unmapped or externally produced values.
#[derive(Debug, Clone, Copy)]
pub struct DataTypeRule {
    /// The type values must conform to.
    pub data_type: DataType,
}

impl ValidationRule for DataTypeRule {
    fn name(&self) -> &str {
        "dataType"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
        if self.data_type.check(ctx.value) {
            Vec::new()
        } else {
            vec![ValidationError::on_property(
                self.name(),
                ctx.subject(),
                format!("must be of type {}", self.data_type),
            )]
        }
    }
}

/// Builds a rule from its JSON configuration.
pub type RuleFactory = fn(&serde_json::Value) -> Result<Box<dyn ValidationRule>>;

/// Instantiates rules from named JSON configurations.
///
/// A configuration is an object with a `name` field plus rule-specific
/// parameters, e.g. `{"name": "maxLength", "maxLength": 30}`. The built-in
/// rules register under `required`, `maxLength`, and `dataType`;
/// applications add their own with [`RuleRegistry::register`].
pub struct RuleRegistry {
    factories: HashMap<String, RuleFactory>,
}

impl RuleRegistry {
    /// Creates a registry with no rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory under a rule name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, factory: RuleFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiates the rule a configuration names.
    ///
    /// # Errors
    ///
    /// Returns a metadata error when the configuration has no `name`, names
    /// an unregistered rule, or carries parameters the factory rejects.
    pub fn rule_from_config(&self, config: &serde_json::Value) -> Result<Box<dyn ValidationRule>> {
        let name = config
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::metadata(format!("validator config without a name: {config}")))?;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::metadata(format!("no validation rule named '{name}'")))?;
        factory(config)
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("required", |_| Ok(Box::new(Required)));
        registry.register("maxLength", |cfg| {
            let max = cfg
                .get("maxLength")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| Error::metadata("maxLength validator needs a maxLength number"))?;
            #[allow(clippy::cast_possible_truncation)]
            Ok(Box::new(MaxLength { max: max as usize }))
        });
        registry.register("dataType", |cfg| {
            let name = cfg
                .get("dataType")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| Error::metadata("dataType validator needs a dataType name"))?;
            let data_type: DataType = name.parse()?;
            Ok(Box::new(DataTypeRule { data_type }))
        });
        registry
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("RuleRegistry").field("rules", &names).finish()
    }
}
