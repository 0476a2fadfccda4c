// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Mapping of wire results to per-field outcomes.
//!
//! Read responses and data change notifications share [`read_result`].
//! Write responses use [`write_status`]. A batch answered as a whole with a
//! bad status maps every field through the same function as a single result.

use std::collections::HashMap;

use tracing::warn;

use crate::codec::DataValue;
use crate::error::{OperationError, UaResult};
use crate::types::{FieldResult, ResponseCode, StatusCode, UaField};

/// Field name to outcome.
pub type FieldResults = HashMap<String, FieldResult>;

/// Maps a read or notification value to a field result.
///
/// A present value is decoded regardless of its status. A value that cannot
/// be represented is reported as `Unsupported` without affecting other
/// fields.
pub fn read_result(field: &str, data_value: &DataValue) -> FieldResult {
    match &data_value.value {
        Some(variant) => match variant.to_plc_value() {
            Ok(value) => FieldResult::ok(value),
            Err(e) => {
                warn!(field, error = %e, "Value cannot be represented");
                FieldResult::code(ResponseCode::Unsupported)
            }
        },
        None => FieldResult::code(read_status(data_value.status())),
    }
}

/// Maps the status of a value-less read result.
pub fn read_status(status: StatusCode) -> ResponseCode {
    if status == StatusCode::BAD_NODE_ID_UNKNOWN {
        ResponseCode::NotFound
    } else {
        ResponseCode::Unsupported
    }
}

/// Maps a write status to a response code.
pub fn write_status(status: StatusCode) -> ResponseCode {
    if status.is_good() {
        ResponseCode::Ok
    } else if status == StatusCode::BAD_NODE_ID_UNKNOWN {
        ResponseCode::NotFound
    } else {
        ResponseCode::RemoteError
    }
}

/// Pairs read results with fields positionally.
pub fn read_results(fields: &[UaField], results: &[DataValue]) -> UaResult<FieldResults> {
    check_count("Read", fields.len(), results.len())?;
    Ok(fields
        .iter()
        .zip(results)
        .map(|(field, value)| (field.name.clone(), read_result(&field.name, value)))
        .collect())
}

/// Pairs write statuses with fields positionally.
pub fn write_results(fields: &[UaField], results: &[StatusCode]) -> UaResult<FieldResults> {
    check_count("Write", fields.len(), results.len())?;
    Ok(fields
        .iter()
        .zip(results)
        .map(|(field, status)| (field.name.clone(), FieldResult::code(write_status(*status))))
        .collect())
}

/// Gives every field the code `map(status)`.
pub fn uniform_results(
    fields: &[UaField],
    status: StatusCode,
    map: fn(StatusCode) -> ResponseCode,
) -> FieldResults {
    let code = map(status);
    fields
        .iter()
        .map(|field| (field.name.clone(), FieldResult::code(code)))
        .collect()
}

fn check_count(operation: &'static str, expected: usize, actual: usize) -> UaResult<()> {
    if expected != actual {
        return Err(OperationError::ResultCountMismatch {
            operation,
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}
