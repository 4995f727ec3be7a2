use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memory::Value;

/// A structure decoded at one address.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub address: u64,
    pub layout: String,
    pub fields: BTreeMap<String, Value>,
}

impl EntityRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.fields.get(name).ok_or_else(|| {
            Error::InvalidLayout(format!("record {} has no field '{}'", self.layout, name))
        })
    }

    fn mismatch(&self, name: &str, expected: &str) -> Error {
        Error::InvalidLayout(format!(
            "field '{}' of {} is not {}",
            name, self.layout, expected
        ))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| self.mismatch(name, "an integer"))
    }

    pub fn u64(&self, name: &str) -> Result<u64> {
        self.require(name)?
            .as_u64()
            .ok_or_else(|| self.mismatch(name, "an unsigned integer"))
    }

    pub fn u32(&self, name: &str) -> Result<u32> {
        let value = self.u64(name)?;
        u32::try_from(value).map_err(|_| self.mismatch(name, "a 32-bit value"))
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| self.mismatch(name, "a number"))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| self.mismatch(name, "a bool"))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| self.mismatch(name, "text"))
    }

    /// Pointer field; null is `None`.
    pub fn pointer(&self, name: &str) -> Result<Option<u64>> {
        match self.require(name)? {
            Value::Pointer(p) => Ok((*p != 0).then_some(*p)),
            _ => Err(self.mismatch(name, "a pointer")),
        }
    }
}

/// Predicate over a decoded record.
pub type RecordPredicate = Arc<dyn Fn(&EntityRecord) -> bool + Send + Sync>;

/// Condition an entity must satisfy to be yielded by a traversal.
#[derive(Clone)]
pub enum EntityFilter {
    /// Text field equal to `name`.
    Named {
        field: String,
        name: String,
        ignore_case: bool,
    },
    FieldEquals { field: String, value: Value },
    Predicate(RecordPredicate),
}

impl EntityFilter {
    pub fn named(field: &str, name: &str) -> Self {
        EntityFilter::Named {
            field: field.to_string(),
            name: name.to_string(),
            ignore_case: false,
        }
    }

    pub fn named_ignore_case(field: &str, name: &str) -> Self {
        EntityFilter::Named {
            field: field.to_string(),
            name: name.to_string(),
            ignore_case: true,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        EntityFilter::FieldEquals {
            field: field.to_string(),
            value,
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&EntityRecord) -> bool + Send + Sync + 'static,
    {
        EntityFilter::Predicate(Arc::new(f))
    }

    pub fn matches(&self, record: &EntityRecord) -> bool {
        match self {
            EntityFilter::Named {
                field,
                name,
                ignore_case,
            } => record.get(field).and_then(Value::as_str).is_some_and(|text| {
                if *ignore_case {
                    text.eq_ignore_ascii_case(name)
                } else {
                    text == name
                }
            }),
            // Integers compare by value regardless of width.
            EntityFilter::FieldEquals { field, value } => record.get(field).is_some_and(|v| {
                v == value || (v.as_i64().is_some() && v.as_i64() == value.as_i64())
            }),
            EntityFilter::Predicate(f) => f(record),
        }
    }
}

impl fmt::Debug for EntityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityFilter::Named {
                field,
                name,
                ignore_case,
            } => f
                .debug_struct("Named")
                .field("field", field)
                .field("name", name)
                .field("ignore_case", ignore_case)
                .finish(),
            EntityFilter::FieldEquals { field, value } => f
                .debug_struct("FieldEquals")
                .field("field", field)
                .field("value", value)
                .finish(),
            EntityFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
