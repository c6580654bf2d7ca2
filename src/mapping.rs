// src/mapping.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the unit-of-measure field has been seen under, in lookup order.
pub const UOM_ALIASES: &[&str] = &["UoMEntry", "UomEntry", "uomentry"];

/// A single normalised invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    #[serde(rename = "ItemCode")]
    pub item_code: Value,
    #[serde(rename = "UoMEntry")]
    pub uom_entry: Value,
    #[serde(rename = "TaxCode")]
    pub tax_code: Value,
}

impl DocumentLine {
    pub fn from_source(line: &Map<String, Value>) -> Self {
        Self {
            item_code: line.get("ItemCode").cloned().unwrap_or_else(empty_string),
            uom_entry: first_alias(line, UOM_ALIASES),
            tax_code: line.get("TaxCode").cloned().unwrap_or_else(empty_string),
        }
    }
}

/// The invoice body sent to the ERP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseInvoice {
    #[serde(rename = "CardCode")]
    pub card_code: Value,
    #[serde(rename = "DocumentLines")]
    pub document_lines: Vec<DocumentLine>,
}

/// The mapping service's `mapped_result`, with the fields we act on pulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedInvoice {
    pub card_code: Value,
    pub document_lines: Vec<DocumentLine>,
    /// The full payload as received, including fields we don't interpret.
    pub raw: Map<String, Value>,
}

impl MappedInvoice {
    pub fn from_payload(raw: Map<String, Value>) -> Self {
        let card_code = raw.get("CardCode").cloned().unwrap_or_else(empty_string);
        let document_lines = raw
            .get("DocumentLines")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_object)
                    .map(DocumentLine::from_source)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            card_code,
            document_lines,
            raw,
        }
    }

    pub fn to_purchase_invoice(&self) -> PurchaseInvoice {
        PurchaseInvoice {
            card_code: self.card_code.clone(),
            document_lines: self.document_lines.clone(),
        }
    }

    /// One spreadsheet row for the whole payload.
    pub fn flatten(&self) -> Map<String, Value> {
        flatten(&self.raw)
    }
}

fn empty_string() -> Value {
    Value::String(String::new())
}

/// First alias present with a non-null value, or null.
fn first_alias(obj: &Map<String, Value>, aliases: &[&str]) -> Value {
    aliases
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Collapse nested objects into `parent_child` keys. String lists are joined
/// with `"; "`, other lists become JSON text, and a `line_items` list is
/// spread over `line_item_<n>_<field>` columns.
pub fn flatten(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(obj, "", &mut out);
    out
}

fn flatten_into(obj: &Map<String, Value>, parent: &str, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let full_key = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}_{key}")
        };

        if key == "line_items" {
            if let Value::Array(items) = value {
                spread_line_items(items, out);
                continue;
            }
        }

        match value {
            Value::Object(child) => flatten_into(child, &full_key, out),
            Value::Array(list) => {
                out.insert(full_key, list_cell(list));
            }
            scalar => {
                out.insert(full_key, scalar.clone());
            }
        }
    }
}

fn spread_line_items(items: &[Value], out: &mut Map<String, Value>) {
    for (i, item) in items.iter().enumerate() {
        let Some(fields) = item.as_object() else {
            continue;
        };
        for (field, v) in fields {
            let column = format!("line_item_{}_{}", i + 1, field);
            let cell = match v {
                Value::Array(list) => list_cell(list),
                other => other.clone(),
            };
            out.insert(column, cell);
        }
    }
}

fn list_cell(list: &[Value]) -> Value {
    if list.iter().all(Value::is_string) {
        let joined = list
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; ");
        Value::String(joined)
    } else {
        Value::String(Value::Array(list.to_vec()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn flatten_nested_and_string_lists() {
        let flat = flatten(&obj(json!({"a": {"b": 1}, "c": ["x", "y"]})));
        assert_eq!(Value::Object(flat), json!({"a_b": 1, "c": "x; y"}));
    }

    #[test]
    fn flatten_deep_paths_keep_order() {
        let flat = flatten(&obj(json!({
            "vendor": {"address": {"city": "Oslo", "zip": "0150"}},
            "total": 12.5,
            "paid": false,
            "note": null
        })));
        let keys: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["vendor_address_city", "vendor_address_zip", "total", "paid", "note"]
        );
        assert_eq!(flat["total"], json!(12.5));
        assert_eq!(flat["note"], Value::Null);
    }

    #[test]
    fn flatten_mixed_list_becomes_json_text() {
        let flat = flatten(&obj(json!({"codes": [1, "a"], "tags": []})));
        assert_eq!(flat["codes"], json!("[1,\"a\"]"));
        assert_eq!(flat["tags"], json!(""));
    }

    #[test]
    fn flatten_spreads_line_items() {
        let flat = flatten(&obj(json!({
            "line_items": [
                {"description": "Widget", "qty": 2, "tags": ["red", "big"]},
                {"description": "Gadget"}
            ]
        })));
        assert_eq!(
            Value::Object(flat),
            json!({
                "line_item_1_description": "Widget",
                "line_item_1_qty": 2,
                "line_item_1_tags": "red; big",
                "line_item_2_description": "Gadget"
            })
        );
    }

    #[test]
    fn uom_variant_is_normalised() {
        let line = DocumentLine::from_source(&obj(json!({"ItemCode": "I1", "UomEntry": 7})));
        assert_eq!(line.uom_entry, json!(7));
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"ItemCode": "I1", "UoMEntry": 7, "TaxCode": ""})
        );
    }

    #[test]
    fn missing_uom_is_null() {
        let line = DocumentLine::from_source(&obj(json!({"ItemCode": "I1", "TaxCode": "T1"})));
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"ItemCode": "I1", "UoMEntry": null, "TaxCode": "T1"})
        );
    }

    #[test]
    fn uom_alias_priority_skips_null() {
        let line = DocumentLine::from_source(&obj(json!({
            "UoMEntry": null, "UomEntry": 3, "uomentry": 9
        })));
        assert_eq!(line.uom_entry, json!(3));

        let zero = DocumentLine::from_source(&obj(json!({"UoMEntry": 0, "uomentry": 9})));
        assert_eq!(zero.uom_entry, json!(0));
    }

    #[test]
    fn purchase_invoice_from_mapping() {
        let mapped = MappedInvoice::from_payload(obj(json!({
            "CardCode": "C1",
            "DocDate": "2024-03-07",
            "DocumentLines": [
                {"ItemCode": "I1", "uomentry": 5, "TaxCode": "T1", "Price": 3.5},
                "not a line"
            ]
        })));
        assert_eq!(
            serde_json::to_value(mapped.to_purchase_invoice()).unwrap(),
            json!({
                "CardCode": "C1",
                "DocumentLines": [{"ItemCode": "I1", "UoMEntry": 5, "TaxCode": "T1"}]
            })
        );
    }

    #[test]
    fn missing_card_code_and_lines_default() {
        let mapped = MappedInvoice::from_payload(Map::new());
        assert_eq!(
            serde_json::to_value(mapped.to_purchase_invoice()).unwrap(),
            json!({"CardCode": "", "DocumentLines": []})
        );
    }
}
