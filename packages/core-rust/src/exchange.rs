use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::ExchangeError;
use crate::types::Value;

/// Header carrying the id of the saga an exchange belongs to.
pub const SAGA_LONG_RUNNING_ACTION: &str = "Long-Running-Action";

/// Message context flowing through processors.
///
/// Carries a body, headers (copied to outbound messages), properties (local
/// to this exchange) and an exception slot. The mediation layer reads and
/// writes well-known headers but never interprets the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    id: String,
    /// Message payload.
    pub body: Value,
    headers: BTreeMap<String, Value>,
    properties: BTreeMap<String, Value>,
    exception: Option<ExchangeError>,
}

impl Exchange {
    /// Creates an empty exchange with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_body(Value::Null)
    }

    /// Creates an exchange with a fresh id and the given body.
    pub fn with_body(body: impl Into<Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
            headers: BTreeMap::new(),
            properties: BTreeMap::new(),
            exception: None,
        }
    }

    /// Unique id of this exchange.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Looks up a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Sets a header, returning the previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.headers.insert(name.into(), value.into())
    }

    /// Removes a header, returning its value.
    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }

    /// All headers in key order.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    /// Builder-style header setter.
    #[must_use]
    pub fn header_with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Looks up a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Sets a property, returning the previous value.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    /// The recorded failure, if any.
    #[must_use]
    pub fn exception(&self) -> Option<&ExchangeError> {
        self.exception.as_ref()
    }

    /// Records a failure on the exchange.
    pub fn set_exception(&mut self, error: ExchangeError) {
        self.exception = Some(error);
    }

    /// Clears and returns the recorded failure.
    pub fn take_exception(&mut self) -> Option<ExchangeError> {
        self.exception.take()
    }

    /// `true` when a failure has been recorded.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.exception.is_some()
    }

    /// The saga id bound to this exchange, if any.
    #[must_use]
    pub fn saga_id(&self) -> Option<&str> {
        self.header(SAGA_LONG_RUNNING_ACTION).and_then(Value::as_str)
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(Exchange::new().id(), Exchange::new().id());
    }

    #[test]
    fn headers_and_properties_are_separate() {
        let mut ex = Exchange::with_body("payload").header_with("h", 1_i64);
        ex.set_property("h", "prop");
        assert_eq!(ex.header("h"), Some(&Value::Int(1)));
        assert_eq!(ex.property("h"), Some(&Value::from("prop")));
        assert_eq!(ex.remove_header("h"), Some(Value::Int(1)));
        assert!(ex.header("h").is_none());
    }

    #[test]
    fn exception_slot_round_trip() {
        let mut ex = Exchange::new();
        assert!(!ex.is_failed());
        ex.set_exception(ExchangeError::io("broken pipe"));
        assert!(ex.is_failed());
        let err = ex.take_exception().unwrap();
        assert_eq!(err.message, "broken pipe");
        assert!(!ex.is_failed());
    }

    #[test]
    fn saga_id_reads_long_running_action_header() {
        let ex = Exchange::new().header_with(SAGA_LONG_RUNNING_ACTION, "saga-1");
        assert_eq!(ex.saga_id(), Some("saga-1"));
    }
}
