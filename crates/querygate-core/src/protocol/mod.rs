//! Gateway wire-message model.
//!
//! Defines the query/response message structures exchanged between clients
//! and the gateway, plus the enumerations shared across subsystems. The
//! transport framing itself lives outside the core; these types carry the
//! serde codec that the framing layer wraps.

mod message;
mod types;

pub use message::{
    AuthToken, CellValue, ColumnMetadata, MessageHeader, ParamValue, QueryOptions, QueryParam,
    QueryRequest, QueryResponse, ResultRow,
};
pub use types::{parse_query_type, QueryType, StatusCode};
