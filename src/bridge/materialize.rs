//! Row materialization: per-column slots and null-aware cell extraction.
//!
//! A row is read by filling one slot per column atomically, then converting
//! each slot into a canonical value. Cell-level failures degrade to NULL and
//! never abort the row; only a failed row read escapes to the caller.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as Json;

use crate::backend::{BackendCell, ScanRepr, ScanSlot};
use crate::error::CellError;

use super::resolve::ColumnDescriptor;
use super::PgValue;

/// Allocate one scan slot per column, sized to its representation.
pub fn slots_for(columns: &[ColumnDescriptor]) -> Vec<ScanSlot> {
    columns
        .iter()
        .map(|column| ScanSlot::for_repr(column.repr.clone()))
        .collect()
}

/// Convert one fully populated row of slots into canonical values.
///
/// Never fails: every per-cell failure is absorbed as NULL or a display-text
/// fallback.
pub fn materialize_row(slots: &[ScanSlot]) -> Vec<PgValue> {
    slots.iter().map(extract_cell).collect()
}

fn extract_cell(slot: &ScanSlot) -> PgValue {
    match (slot.repr(), slot.cell()) {
        (_, BackendCell::Nullable { valid: false, .. }) => PgValue::Null,
        (ScanRepr::Other(_), BackendCell::Nullable { raw, .. }) => {
            PgValue::FallbackText(display(raw))
        }
        (repr, BackendCell::Nullable { raw, .. }) => {
            scalar_value(repr, raw).unwrap_or(PgValue::Null)
        }
        (ScanRepr::Array { elem, .. }, BackendCell::Array1(items)) => array_value(elem, items, 1),
        (ScanRepr::Array { elem, .. }, BackendCell::Array2(items)) => array_value(elem, items, 2),
        (ScanRepr::Array { elem, .. }, BackendCell::Array3(items)) => array_value(elem, items, 3),
        (_, BackendCell::Map(entries)) => map_value(entries),
        (_, BackendCell::Opaque(raw)) => PgValue::FallbackText(display(raw)),
        // Representation and delivered shape disagree; render what arrived.
        (
            _,
            BackendCell::Array1(items) | BackendCell::Array2(items) | BackendCell::Array3(items),
        ) => PgValue::FallbackText(display(&Json::Array(items.clone()))),
    }
}

/// Extract a scalar through its representation's accessor.
fn scalar_value(repr: &ScanRepr, raw: &Json) -> Result<PgValue, CellError> {
    match repr {
        ScanRepr::Bool => raw
            .as_bool()
            .map(PgValue::Bool)
            .ok_or_else(|| accessor_mismatch("boolean", raw)),
        ScanRepr::Int4 => raw
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(PgValue::Int4)
            .ok_or_else(|| accessor_mismatch("int4", raw)),
        ScanRepr::Int8 => raw
            .as_i64()
            .map(PgValue::Int8)
            .ok_or_else(|| accessor_mismatch("int8", raw)),
        ScanRepr::Float8 => raw
            .as_f64()
            .map(PgValue::Float8)
            .ok_or_else(|| accessor_mismatch("float8", raw)),
        ScanRepr::Timestamp => raw
            .as_str()
            .ok_or_else(|| accessor_mismatch("timestamp", raw))
            .and_then(parse_timestamp)
            .map(PgValue::Timestamp),
        ScanRepr::Text => raw
            .as_str()
            .map(|s| PgValue::Text(s.to_string()))
            .ok_or_else(|| accessor_mismatch("text", raw)),
        ScanRepr::Array { .. } | ScanRepr::Map | ScanRepr::Other(_) => Err(CellError(format!(
            "{repr:?} is not a scalar representation"
        ))),
    }
}

/// Extract one array level; `depth` counts the levels still expected below
/// the current sequence.
fn array_value(elem: &ScanRepr, items: &[Json], depth: u8) -> PgValue {
    PgValue::Array(
        items
            .iter()
            .map(|item| array_element(elem, item, depth))
            .collect(),
    )
}

fn array_element(elem: &ScanRepr, item: &Json, depth: u8) -> PgValue {
    if item.is_null() {
        return PgValue::Null;
    }
    if depth > 1 {
        return match item.as_array() {
            Some(inner) => array_value(elem, inner, depth - 1),
            None => PgValue::FallbackText(display(item)),
        };
    }
    match elem {
        ScanRepr::Map => match item.as_object() {
            Some(entries) => PgValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| (PgValue::Text(key.clone()), loose_value(value)))
                    .collect(),
            ),
            None => PgValue::FallbackText(display(item)),
        },
        _ => scalar_value(elem, item).unwrap_or(PgValue::Null),
    }
}

fn map_value(entries: &[(Json, Json)]) -> PgValue {
    PgValue::Map(
        entries
            .iter()
            .map(|(key, value)| (loose_value(key), loose_value(value)))
            .collect(),
    )
}

/// Best-effort conversion for values whose element shape is not declared,
/// such as map keys and values.
fn loose_value(raw: &Json) -> PgValue {
    match raw {
        Json::Null => PgValue::Null,
        Json::Bool(v) => PgValue::Bool(*v),
        Json::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(v), _) => PgValue::Int8(v),
            (None, Some(v)) => PgValue::Float8(v),
            (None, None) => PgValue::FallbackText(n.to_string()),
        },
        Json::String(s) => PgValue::Text(s.clone()),
        other => PgValue::FallbackText(display(other)),
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, CellError> {
    let trimmed = text.trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .or_else(|_| {
            // Bare times ride on the epoch date.
            NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                .map(|time| NaiveDateTime::new(NaiveDate::default(), time))
        })
        .map_err(|e| CellError(format!("unparseable temporal value '{trimmed}': {e}")))
}

fn accessor_mismatch(expected: &str, raw: &Json) -> CellError {
    CellError(format!("expected {expected}, got {raw}"))
}

/// Display-string form of an arbitrary payload; strings render bare.
fn display(raw: &Json) -> String {
    match raw {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot(repr: ScanRepr, cell: BackendCell) -> ScanSlot {
        let mut slot = ScanSlot::for_repr(repr);
        slot.fill(cell);
        slot
    }

    #[test]
    fn test_invalid_slot_is_null_regardless_of_payload() {
        // The payload is a perfectly extractable value; validity wins.
        let slot = slot(
            ScanRepr::Int4,
            BackendCell::Nullable {
                valid: false,
                raw: json!(42),
            },
        );
        assert_eq!(materialize_row(&[slot]), vec![PgValue::Null]);
    }

    #[test]
    fn test_valid_scalars_extract() {
        let slots = vec![
            slot(
                ScanRepr::Bool,
                BackendCell::Nullable {
                    valid: true,
                    raw: json!(true),
                },
            ),
            slot(
                ScanRepr::Int4,
                BackendCell::Nullable {
                    valid: true,
                    raw: json!(42),
                },
            ),
            slot(
                ScanRepr::Text,
                BackendCell::Nullable {
                    valid: true,
                    raw: json!("abc"),
                },
            ),
        ];
        assert_eq!(
            materialize_row(&slots),
            vec![
                PgValue::Bool(true),
                PgValue::Int4(42),
                PgValue::Text("abc".to_string()),
            ]
        );
    }

    #[test]
    fn test_accessor_failure_degrades_to_null() {
        // Declared int4, delivered text: the cell fails, the row survives.
        let slots = vec![
            slot(
                ScanRepr::Int4,
                BackendCell::Nullable {
                    valid: true,
                    raw: json!("not a number"),
                },
            ),
            slot(
                ScanRepr::Text,
                BackendCell::Nullable {
                    valid: true,
                    raw: json!("kept"),
                },
            ),
        ];
        assert_eq!(
            materialize_row(&slots),
            vec![PgValue::Null, PgValue::Text("kept".to_string())]
        );
    }

    #[test]
    fn test_int4_overflow_degrades_to_null() {
        let slot = slot(
            ScanRepr::Int4,
            BackendCell::Nullable {
                valid: true,
                raw: json!(i64::MAX),
            },
        );
        assert_eq!(materialize_row(&[slot]), vec![PgValue::Null]);
    }

    #[test]
    fn test_timestamp_parsing() {
        let slot = slot(
            ScanRepr::Timestamp,
            BackendCell::Nullable {
                valid: true,
                raw: json!("2021-01-01 12:00:00.123"),
            },
        );
        let row = materialize_row(&[slot]);
        match &row[0] {
            PgValue::Timestamp(ts) => {
                assert_eq!(ts.to_string(), "2021-01-01 12:00:00.123");
            }
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_date_only_timestamp_parses() {
        let slot = slot(
            ScanRepr::Timestamp,
            BackendCell::Nullable {
                valid: true,
                raw: json!("2021-06-15"),
            },
        );
        let row = materialize_row(&[slot]);
        assert!(matches!(row[0], PgValue::Timestamp(_)));
    }

    #[test]
    fn test_array_extracts_without_container_validity() {
        let repr = ScanRepr::Array {
            elem: Box::new(ScanRepr::Int4),
            depth: 1,
        };
        let slot = slot(repr, BackendCell::Array1(vec![json!(1), json!(null), json!(3)]));
        assert_eq!(
            materialize_row(&[slot]),
            vec![PgValue::Array(vec![
                PgValue::Int4(1),
                PgValue::Null,
                PgValue::Int4(3),
            ])]
        );
    }

    #[test]
    fn test_two_level_array() {
        let repr = ScanRepr::Array {
            elem: Box::new(ScanRepr::Text),
            depth: 2,
        };
        let slot = slot(
            repr,
            BackendCell::Array2(vec![json!(["a", "b"]), json!(null), json!([null])]),
        );
        assert_eq!(
            materialize_row(&[slot]),
            vec![PgValue::Array(vec![
                PgValue::Array(vec![
                    PgValue::Text("a".to_string()),
                    PgValue::Text("b".to_string()),
                ]),
                PgValue::Null,
                PgValue::Array(vec![PgValue::Null]),
            ])]
        );
    }

    #[test]
    fn test_three_level_array() {
        let repr = ScanRepr::Array {
            elem: Box::new(ScanRepr::Int8),
            depth: 3,
        };
        let slot = slot(repr, BackendCell::Array3(vec![json!([[1], [2, null]])]));
        assert_eq!(
            materialize_row(&[slot]),
            vec![PgValue::Array(vec![PgValue::Array(vec![
                PgValue::Array(vec![PgValue::Int8(1)]),
                PgValue::Array(vec![PgValue::Int8(2), PgValue::Null]),
            ])])]
        );
    }

    #[test]
    fn test_map_extracts_with_nullable_values() {
        let slot = slot(
            ScanRepr::Map,
            BackendCell::Map(vec![
                (json!("1"), json!("one")),
                (json!("2"), json!(null)),
            ]),
        );
        assert_eq!(
            materialize_row(&[slot]),
            vec![PgValue::Map(vec![
                (PgValue::Text("1".to_string()), PgValue::Text("one".to_string())),
                (PgValue::Text("2".to_string()), PgValue::Null),
            ])]
        );
    }

    #[test]
    fn test_opaque_falls_back_to_display_text() {
        let slot = slot(
            ScanRepr::Other("row(x integer)".to_string()),
            BackendCell::Opaque(json!([1, "x"])),
        );
        assert_eq!(
            materialize_row(&[slot]),
            vec![PgValue::FallbackText("[1,\"x\"]".to_string())]
        );
    }

    #[test]
    fn test_slots_match_descriptor_shapes() {
        use crate::bridge::resolve::describe_columns;
        use crate::backend::ColumnMeta;

        let columns = vec![
            ColumnMeta::new("a", ScanRepr::Bool),
            ColumnMeta::new("b", ScanRepr::Map),
        ];
        let descriptors = describe_columns(&columns);
        let slots = slots_for(&descriptors);

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].repr(), &ScanRepr::Bool);
        assert_eq!(slots[1].repr(), &ScanRepr::Map);
        // Unfilled slots read as NULL.
        assert_eq!(materialize_row(&slots), vec![PgValue::Null, PgValue::Null]);
    }
}
