//! Marker icon extraction from simplestyle GeoJSON.
//!
//! The marker overlay lists point features whose simplestyle properties
//! (`marker-size`, `marker-symbol`, `marker-color`) determine which
//! icon image the map renders. A download job parses the overlay once
//! and fetches each distinct icon referenced by it.

use std::collections::HashSet;

use serde_json::Value;

use crate::source::FetchError;

/// Extracts the distinct icon file names referenced by a marker
/// overlay, in first-seen order.
///
/// Icon names follow the hosted-map convention
/// `pin-{s|m|l}[-symbol][+color].png`. Features without a usable
/// `marker-size` are skipped; symbols and colors are dropped when they
/// contain characters outside the icon naming alphabet, which also
/// keeps fetched names safe to use as file names.
pub(crate) fn icon_names(index: &[u8]) -> Result<Vec<String>, FetchError> {
    let doc: Value = serde_json::from_slice(index)
        .map_err(|e| FetchError::Malformed(format!("marker overlay is not valid JSON: {}", e)))?;

    let features = match doc.get("features").and_then(Value::as_array) {
        Some(features) => features,
        None => {
            return Err(FetchError::Malformed(
                "marker overlay has no features array".into(),
            ))
        }
    };

    let mut names = Vec::new();
    let mut seen = HashSet::new();
    for feature in features {
        let properties = match feature.get("properties").and_then(Value::as_object) {
            Some(properties) => properties,
            None => continue,
        };
        if let Some(name) = icon_name(properties) {
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

fn icon_name(properties: &serde_json::Map<String, Value>) -> Option<String> {
    let size = properties.get("marker-size").and_then(Value::as_str)?;
    let size = match size.chars().next()? {
        c @ ('s' | 'm' | 'l') => c,
        _ => return None,
    };

    let mut name = format!("pin-{}", size);

    if let Some(symbol) = properties.get("marker-symbol").and_then(Value::as_str) {
        if !symbol.is_empty() && symbol.chars().all(valid_symbol_char) {
            name.push('-');
            name.push_str(symbol);
        }
    }

    if let Some(color) = properties.get("marker-color").and_then(Value::as_str) {
        let color = color.trim_start_matches('#');
        if (color.len() == 3 || color.len() == 6) && color.chars().all(|c| c.is_ascii_hexdigit()) {
            name.push('+');
            name.push_str(&color.to_ascii_lowercase());
        }
    }

    name.push_str(".png");
    Some(name)
}

fn valid_symbol_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}
