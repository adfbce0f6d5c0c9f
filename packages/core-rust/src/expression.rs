//! Expressions evaluated against an exchange.
//!
//! Used to capture saga step options and to compute sticky correlation keys.
//! [`ExpressionDefinition`] is the declarative (serde) form; [`Expression`]
//! is the runtime contract.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::exchange::Exchange;
use crate::types::Value;

/// Failure while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("required header '{0}' is missing")]
    MissingHeader(String),
    #[error("required property '{0}' is missing")]
    MissingProperty(String),
    #[error("{0}")]
    Failed(String),
}

/// Evaluates to a value against a message context.
pub trait Expression: Send + Sync {
    /// Evaluates this expression against the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error when the expression cannot produce a value.
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError>;
}

impl<F> Expression for F
where
    F: Fn(&Exchange) -> Result<Value, ExpressionError> + Send + Sync,
{
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        self(exchange)
    }
}

/// Reads a header; missing headers evaluate to `Null` unless `required`.
#[derive(Debug, Clone)]
pub struct HeaderExpression {
    name: String,
    required: bool,
}

impl Expression for HeaderExpression {
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        match exchange.header(&self.name) {
            Some(v) => Ok(v.clone()),
            None if self.required => Err(ExpressionError::MissingHeader(self.name.clone())),
            None => Ok(Value::Null),
        }
    }
}

/// Reads a property; missing properties evaluate to `Null` unless `required`.
#[derive(Debug, Clone)]
pub struct PropertyExpression {
    name: String,
    required: bool,
}

impl Expression for PropertyExpression {
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        match exchange.property(&self.name) {
            Some(v) => Ok(v.clone()),
            None if self.required => Err(ExpressionError::MissingProperty(self.name.clone())),
            None => Ok(Value::Null),
        }
    }
}

/// Always evaluates to the same value.
#[derive(Debug, Clone)]
pub struct ConstantExpression(pub Value);

impl Expression for ConstantExpression {
    fn evaluate(&self, _exchange: &Exchange) -> Result<Value, ExpressionError> {
        Ok(self.0.clone())
    }
}

/// Evaluates to the exchange body.
#[derive(Debug, Clone, Copy)]
pub struct BodyExpression;

impl Expression for BodyExpression {
    fn evaluate(&self, exchange: &Exchange) -> Result<Value, ExpressionError> {
        Ok(exchange.body.clone())
    }
}

/// Header lookup that yields `Null` when absent.
pub fn header(name: impl Into<String>) -> Arc<dyn Expression> {
    Arc::new(HeaderExpression {
        name: name.into(),
        required: false,
    })
}

/// Header lookup that fails when absent.
pub fn required_header(name: impl Into<String>) -> Arc<dyn Expression> {
    Arc::new(HeaderExpression {
        name: name.into(),
        required: true,
    })
}

/// Property lookup that yields `Null` when absent.
pub fn property(name: impl Into<String>) -> Arc<dyn Expression> {
    Arc::new(PropertyExpression {
        name: name.into(),
        required: false,
    })
}

/// Constant value.
pub fn constant(value: impl Into<Value>) -> Arc<dyn Expression> {
    Arc::new(ConstantExpression(value.into()))
}

/// The exchange body.
pub fn body() -> Arc<dyn Expression> {
    Arc::new(BodyExpression)
}

/// Declarative form of the built-in expressions, loadable from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpressionDefinition {
    Header {
        name: String,
        #[serde(default)]
        required: bool,
    },
    Property {
        name: String,
        #[serde(default)]
        required: bool,
    },
    Constant {
        value: Value,
    },
    Body,
}

impl ExpressionDefinition {
    /// Builds the runtime expression.
    #[must_use]
    pub fn build(&self) -> Arc<dyn Expression> {
        match self {
            ExpressionDefinition::Header { name, required } => Arc::new(HeaderExpression {
                name: name.clone(),
                required: *required,
            }),
            ExpressionDefinition::Property { name, required } => {
                Arc::new(PropertyExpression {
                    name: name.clone(),
                    required: *required,
                })
            }
            ExpressionDefinition::Constant { value } => Arc::new(ConstantExpression(value.clone())),
            ExpressionDefinition::Body => Arc::new(BodyExpression),
        }
    }
}

impl fmt::Display for ExpressionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionDefinition::Header { name, .. } => write!(f, "header({name})"),
            ExpressionDefinition::Property { name, .. } => write!(f, "property({name})"),
            ExpressionDefinition::Constant { value } => write!(f, "constant({value})"),
            ExpressionDefinition::Body => f.write_str("body()"),
        }
    }
}
