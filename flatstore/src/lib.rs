pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod defaults;
pub mod error;
pub mod filter;
pub mod lock;
pub mod record;
pub mod schema;
pub mod store;
pub mod table;
pub mod validation;
pub mod value;

pub use aggregate::{AggregateRequest, AggregateSpec};
pub use cancel::CancellationToken;
pub use config::{IdStrategy, StoreConfig};
pub use convert::ConversionStrategy;
pub use defaults::{DefaultValueProvider, PatternDefaults};
pub use error::{ErrorKind, FlatStoreError, Result};
pub use filter::{FilterOperator, Predicate};
pub use lock::RetryPolicy;
pub use record::Record;
pub use schema::{CollectionSchema, FieldDefinition};
pub use store::bulk::{BulkOperationRequest, BulkResult};
pub use store::query::{ListResult, QueryOptions, SortDirection};
pub use store::Store;
pub use value::{FieldType, Fields, Value};
