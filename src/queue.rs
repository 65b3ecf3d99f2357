// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Configuration
//!
//! This module provides the definition of the queue the consumer declares and consumes
//! from. Broker-specific queue arguments (`x-message-ttl`, `x-dead-letter-exchange`, ...)
//! are carried as opaque JSON values and converted into an AMQP field table at declare time.
//!
//! An empty name asks the broker to generate one; consuming with an empty name then reads
//! from that server-named queue.

use lapin::types::{AMQPValue, FieldArray, FieldTable, LongString, ShortString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Definition of the queue consumed by the consumer.
///
/// This struct implements the builder pattern. It is immutable once handed to the
/// consumer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) durable: bool,
    #[serde(default)]
    pub(crate) exclusive: bool,
    #[serde(default)]
    pub(crate) auto_delete: bool,
    #[serde(default)]
    pub(crate) arguments: Option<BTreeMap<String, Value>>,
}

impl QueueConfig {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive,
    /// not auto-deleted, no arguments).
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition with default settings
    pub fn new(name: &str) -> QueueConfig {
        QueueConfig {
            name: name.to_owned(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            arguments: None,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when its last consumer goes away.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Replaces the broker-specific queue arguments.
    ///
    /// # Parameters
    /// * `arguments` - A map of argument names to values
    ///
    /// # Returns
    /// Self for method chaining
    pub fn arguments(mut self, arguments: BTreeMap<String, Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Adds a single broker-specific argument to the queue.
    ///
    /// # Parameters
    /// * `key` - The argument name
    /// * `value` - The argument value
    ///
    /// # Returns
    /// Self for method chaining
    pub fn argument(mut self, key: &str, value: Value) -> Self {
        self.arguments
            .get_or_insert_with(BTreeMap::default)
            .insert(key.to_owned(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.auto_delete
    }

    /// Builds the AMQP field table sent along with the queue declaration.
    pub(crate) fn field_table(&self) -> FieldTable {
        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

        if let Some(arguments) = &self.arguments {
            for (key, value) in arguments {
                btree.insert(ShortString::from(key.clone()), amqp_value(value));
            }
        }

        FieldTable::from(btree)
    }
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AMQPValue::LongLongInt(i),
            None => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AMQPValue::LongString(LongString::from(s.clone())),
        Value::Array(arr) => {
            AMQPValue::FieldArray(FieldArray::from(arr.iter().map(amqp_value).collect::<Vec<_>>()))
        }
        Value::Object(obj) => {
            let mut btree = BTreeMap::<ShortString, AMQPValue>::default();
            for (key, value) in obj {
                btree.insert(ShortString::from(key.clone()), amqp_value(value));
            }
            AMQPValue::FieldTable(FieldTable::from(btree))
        }
    }
}
