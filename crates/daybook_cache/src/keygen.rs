//! Temporary key generation for added entities.
//!
//! Types whose keys are produced by the store (identity columns) or by a
//! registered generator still need a placeholder identity on the client
//! between attach and save. Generators hand out values that cannot collide
//! with real store-issued keys; at save time the server reports the real
//! keys and the cache rewrites every reference.

use std::collections::HashSet;

use daybook_foundation::{DataType, Error, Result, Value};
use daybook_metadata::DataProperty;

/// Produces placeholder key values for entities attached as `Added`.
///
/// Implementations must guarantee that [`KeyGenerator::is_temporary`]
/// recognizes every value the generator has handed out, including values
/// round-tripped through an export and imported into a fresh cache.
pub trait KeyGenerator {
    /// Produces the next placeholder value for the given key property.
    ///
    /// # Errors
    ///
    /// Returns a key generation error when no placeholder can be produced
    /// for the property's data type.
    fn next_temp_value(&mut self, property: &DataProperty) -> Result<Value>;

    /// Returns true if `value` is a placeholder this generator could have
    /// produced.
    fn is_temporary(&self, value: &Value) -> bool;

    /// Values handed out since construction or the last reset.
    fn temp_values(&self) -> Vec<Value>;

    /// Ensures future placeholders cannot collide with `value`.
    ///
    /// Called when an exported entity carrying a placeholder key is
    /// imported into a cache with its own generator.
    fn reserve(&mut self, value: &Value);

    /// Forgets all handed-out values and starts over.
    fn reset(&mut self);
}

/// The default generator: descending negative integers.
///
/// Real store keys are non-negative in every schema this was built for, so
/// negatives are recognizable as placeholders without any shared state.
/// String keys get a `~`-prefixed rendering of the same counter.
#[derive(Debug)]
pub struct NegativeKeyGenerator {
    next: i64,
    issued: HashSet<Value>,
}

impl NegativeKeyGenerator {
    /// Creates a generator starting at -1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: -1,
            issued: HashSet::new(),
        }
    }
}

impl Default for NegativeKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for NegativeKeyGenerator {
    fn next_temp_value(&mut self, property: &DataProperty) -> Result<Value> {
        let Some(data_type) = property.scalar_type() else {
            return Err(Error::key_generation(format!(
                "key property {} is not scalar",
                property.name
            )));
        };
        let n = self.next;
        self.next -= 1;
        let value = match data_type {
            DataType::Int => Value::Int(n),
            #[allow(clippy::cast_precision_loss)]
            DataType::Float => Value::Float(n as f64),
            DataType::String => Value::from(format!("~{}", -n)),
            DataType::Bool => {
                return Err(Error::key_generation(format!(
                    "cannot generate keys for bool property {}",
                    property.name
                )));
            }
        };
        self.issued.insert(value.clone());
        Ok(value)
    }

    fn is_temporary(&self, value: &Value) -> bool {
        match value {
            Value::Int(n) => *n < 0,
            Value::Float(f) => *f < 0.0,
            Value::String(s) => s.starts_with('~'),
            Value::Nil | Value::Bool(_) => false,
        }
    }

    fn temp_values(&self) -> Vec<Value> {
        self.issued.iter().cloned().collect()
    }

    fn reserve(&mut self, value: &Value) {
        let magnitude = match value {
            Value::Int(n) if *n < 0 => Some(*n),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) if *f < 0.0 => Some(*f as i64),
            Value::String(s) => s.strip_prefix('~').and_then(|r| r.parse::<i64>().ok().map(|n| -n)),
            _ => None,
        };
        if let Some(n) = magnitude {
            if n <= self.next {
                self.next = n - 1;
            }
            self.issued.insert(value.clone());
        }
    }

    fn reset(&mut self) {
        self.next = -1;
        self.issued.clear();
    }
}
