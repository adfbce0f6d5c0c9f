//! Mediator Core: exchanges, values, expressions, and the processor/endpoint contracts
//! shared by the saga and routing subsystems.

pub mod error;
pub mod exchange;
pub mod expression;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, ExchangeError};
pub use exchange::{Exchange, SAGA_LONG_RUNNING_ACTION};
pub use expression::{Expression, ExpressionDefinition, ExpressionError};
pub use mock::{MockEndpoint, MockJournal};
pub use traits::{deliver, Endpoint, Processor};
pub use types::Value;
