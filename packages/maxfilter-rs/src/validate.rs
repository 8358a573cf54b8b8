//! Parameter validation: turns the loosely typed raw configuration into a
//! [`FilterConfig`]. Pure; every error names the offending parameter and the
//! value received.

use crate::config::RawConfig;
use crate::error::{MaxfilterError, Result};
use crate::inputs::InputRole;
use crate::types::{
    BadCondition, CoordFrame, Destination, FilterConfig, MagScale, Origin, Regularize,
};
use serde_json::Value;
use std::path::PathBuf;

pub fn validate(raw: &RawConfig) -> Result<FilterConfig> {
    let st_duration = optional_positive("param_st_duration", raw.param("param_st_duration"))?;
    let st_correlation = correlation("param_st_correlation", raw.param("param_st_correlation"))?;
    let origin = origin("param_origin", raw.param("param_origin"))?;

    let int_order = positive_int("param_int_order", raw.param("param_int_order"))?;
    let ext_order = positive_int("param_ext_order", raw.param("param_ext_order"))?;
    if int_order < ext_order {
        return Err(MaxfilterError::range(
            "param_int_order",
            int_order,
            format!("must be >= param_ext_order ({})", ext_order),
        ));
    }

    let coord_frame = literal(
        "param_coord_frame",
        raw.param("param_coord_frame"),
        CoordFrame::LITERALS,
        CoordFrame::from_literal,
    )?;
    let regularize = regularize("param_regularize", raw.param("param_regularize"))?;
    let ignore_ref = boolean("param_ignore_ref", raw.param("param_ignore_ref"))?;
    let bad_condition = literal(
        "param_bad_condition",
        raw.param("param_bad_condition"),
        BadCondition::LITERALS,
        BadCondition::from_literal,
    )?;
    let st_fixed = boolean("param_st_fixed", raw.param("param_st_fixed"))?;
    let st_only = boolean("param_st_only", raw.param("param_st_only"))?;
    let mag_scale = mag_scale("param_mag_scale", raw.param("param_mag_scale"))?;
    let skip_by_annotation =
        labels("param_skip_by_annotation", raw.param("param_skip_by_annotation"))?;
    let extended_proj = projections("param_extended_proj", raw.param("param_extended_proj"))?;
    let destination = destination(raw)?;

    if st_only && st_duration.is_none() {
        return Err(MaxfilterError::conflict(
            "param_st_only",
            "param_st_duration",
            "a tSSS-only projection needs a buffer duration; set param_st_duration or param_st_only=false",
        ));
    }

    Ok(FilterConfig {
        st_duration,
        st_correlation,
        origin,
        int_order,
        ext_order,
        coord_frame,
        regularize,
        ignore_ref,
        bad_condition,
        st_fixed,
        st_only,
        mag_scale,
        skip_by_annotation,
        extended_proj,
        destination,
    })
}

fn finite(field: &str, value: &Value) -> Result<f64> {
    match value.as_f64() {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(MaxfilterError::range(field, value, "expected a finite number")),
    }
}

fn optional_positive(field: &str, value: &Value) -> Result<Option<f64>> {
    if value.is_null() {
        return Ok(None);
    }
    let v = finite(field, value)?;
    if v <= 0.0 {
        return Err(MaxfilterError::range(field, value, "must be positive"));
    }
    Ok(Some(v))
}

fn correlation(field: &str, value: &Value) -> Result<f64> {
    let v = finite(field, value)?;
    if v <= 0.0 || v > 1.0 {
        return Err(MaxfilterError::range(field, value, "must be within (0, 1]"));
    }
    Ok(v)
}

fn positive_int(field: &str, value: &Value) -> Result<u32> {
    let Some(n) = value.as_i64() else {
        return Err(MaxfilterError::range(field, value, "expected an integer"));
    };
    if n <= 0 {
        return Err(MaxfilterError::range(field, value, "must be a positive integer"));
    }
    u32::try_from(n).map_err(|_| MaxfilterError::range(field, value, "is too large"))
}

fn boolean(field: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| MaxfilterError::range(field, value, "expected true or false"))
}

fn literal<T>(
    field: &str,
    value: &Value,
    allowed: &[&str],
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    value.as_str().and_then(parse).ok_or_else(|| {
        MaxfilterError::range(
            field,
            value,
            format!("expected one of: {}", allowed.join(", ")),
        )
    })
}

fn triplet(field: &str, value: &Value) -> Result<[f64; 3]> {
    let reason = "expected a list of three finite numbers";
    let items = value
        .as_array()
        .ok_or_else(|| MaxfilterError::range(field, value, reason))?;
    let coords: Vec<f64> = items
        .iter()
        .map(|v| v.as_f64().filter(|x| x.is_finite()))
        .collect::<Option<_>>()
        .ok_or_else(|| MaxfilterError::range(field, value, reason))?;
    match coords.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(MaxfilterError::range(field, value, reason)),
    }
}

fn origin(field: &str, value: &Value) -> Result<Origin> {
    if value.as_str() == Some("auto") {
        return Ok(Origin::Auto);
    }
    triplet(field, value)
        .map(Origin::Fixed)
        .map_err(|_| MaxfilterError::range(field, value, "expected \"auto\" or [x, y, z]"))
}

fn regularize(field: &str, value: &Value) -> Result<Regularize> {
    match value {
        Value::Null => Ok(Regularize::None),
        Value::String(s) if s == "in" => Ok(Regularize::In),
        _ => Err(MaxfilterError::range(field, value, "expected \"in\" or null")),
    }
}

fn mag_scale(field: &str, value: &Value) -> Result<MagScale> {
    if value.as_str() == Some("auto") {
        return Ok(MagScale::Auto);
    }
    let v = finite(field, value)
        .map_err(|_| MaxfilterError::range(field, value, "expected a number or \"auto\""))?;
    if v <= 0.0 {
        return Err(MaxfilterError::range(field, value, "must be positive"));
    }
    Ok(MagScale::Value(v))
}

fn labels(field: &str, value: &Value) -> Result<Vec<String>> {
    let reason = "expected a string or a list of non-empty strings";
    match value {
        Value::String(s) if !s.is_empty() => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.as_str() {
                Some(s) if !s.is_empty() => Ok(s.to_string()),
                _ => Err(MaxfilterError::range(field, value, reason)),
            })
            .collect(),
        _ => Err(MaxfilterError::range(field, value, reason)),
    }
}

fn projections(field: &str, value: &Value) -> Result<Vec<Vec<f64>>> {
    let reason = "expected a list of equal-length numeric vectors";
    let items = value
        .as_array()
        .ok_or_else(|| MaxfilterError::range(field, value, reason))?;

    let mut vectors = Vec::with_capacity(items.len());
    for item in items {
        let vector: Vec<f64> = item
            .as_array()
            .and_then(|xs| {
                xs.iter()
                    .map(|x| x.as_f64().filter(|v| v.is_finite()))
                    .collect::<Option<Vec<f64>>>()
            })
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MaxfilterError::range(field, value, reason))?;
        vectors.push(vector);
    }

    if let Some(first) = vectors.first() {
        if vectors.iter().any(|v| v.len() != first.len()) {
            return Err(MaxfilterError::range(field, value, reason));
        }
    }
    Ok(vectors)
}

fn destination(raw: &RawConfig) -> Result<Option<Destination>> {
    let coords = raw.param("param_destination");
    let file = InputRole::Destination.declared(raw);

    match (coords.is_null(), file) {
        (false, Some((key, _))) => Err(MaxfilterError::conflict(
            "param_destination",
            key,
            "provide either destination coordinates or a destination file, not both",
        )),
        (false, None) => Ok(Some(Destination::Coordinates(triplet(
            "param_destination",
            coords,
        )?))),
        (true, Some((_, path))) => Ok(Some(Destination::File(PathBuf::from(path)))),
        (true, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use serde_json::json;
    use std::io::Write;

    struct Fixture {
        _dir: tempfile::TempDir,
        fif: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fif = dir.path().join("rest1-raw.fif");
        std::fs::File::create(&fif).unwrap().write_all(b"fif").unwrap();
        Fixture { _dir: dir, fif }
    }

    fn validate_with(extra: Value) -> Result<FilterConfig> {
        let fx = fixture();
        let mut value = json!({ "fif": fx.fif });
        if let (Value::Object(map), Value::Object(extra)) = (&mut value, extra) {
            map.extend(extra);
        }
        let raw = config::from_value(value).unwrap();
        validate(&raw)
    }

    fn assert_range(result: Result<FilterConfig>, expected_field: &str) {
        match result {
            Err(MaxfilterError::ParameterRange { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected ParameterRange on {expected_field}, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = validate_with(json!({})).unwrap();
        assert_eq!(config.int_order, 8);
        assert_eq!(config.ext_order, 3);
        assert_eq!(config.st_correlation, 0.98);
        assert_eq!(config.mag_scale, MagScale::Value(100.0));
        assert_eq!(config.coord_frame, CoordFrame::Head);
        assert_eq!(config.regularize, Regularize::In);
        assert_eq!(config.bad_condition, BadCondition::Error);
        assert_eq!(config.origin, Origin::Auto);
        assert!(config.st_fixed);
        assert!(!config.st_only);
        assert!(!config.ignore_ref);
        assert_eq!(config.st_duration, None);
        assert_eq!(config.destination, None);
        assert!(config.extended_proj.is_empty());
        assert_eq!(config.skip_by_annotation, vec!["edge", "bad_acq_skip"]);
    }

    #[test]
    fn test_int_order_below_ext_order() {
        assert_range(
            validate_with(json!({ "param_int_order": 2, "param_ext_order": 3 })),
            "param_int_order",
        );
        assert!(validate_with(json!({ "param_int_order": 3, "param_ext_order": 3 })).is_ok());
    }

    #[test]
    fn test_orders_must_be_positive_integers() {
        assert_range(validate_with(json!({ "param_ext_order": 0 })), "param_ext_order");
        assert_range(validate_with(json!({ "param_int_order": -8 })), "param_int_order");
        assert_range(validate_with(json!({ "param_int_order": 8.5 })), "param_int_order");
    }

    #[test]
    fn test_correlation_bounds() {
        assert_range(validate_with(json!({ "param_st_correlation": 0.0 })), "param_st_correlation");
        assert_range(validate_with(json!({ "param_st_correlation": 1.2 })), "param_st_correlation");
        assert!(validate_with(json!({ "param_st_correlation": 1.0 })).is_ok());
    }

    #[test]
    fn test_duration_must_be_positive() {
        assert_range(validate_with(json!({ "param_st_duration": -1.0 })), "param_st_duration");
        assert_range(validate_with(json!({ "param_st_duration": "ten" })), "param_st_duration");
        let config = validate_with(json!({ "param_st_duration": 10.0 })).unwrap();
        assert_eq!(config.st_duration, Some(10.0));
    }

    #[test]
    fn test_enum_literals_exact_match() {
        assert_range(validate_with(json!({ "param_coord_frame": "Head" })), "param_coord_frame");
        assert_range(validate_with(json!({ "param_bad_condition": "warn" })), "param_bad_condition");
        assert_range(validate_with(json!({ "param_regularize": "IN" })), "param_regularize");
        let config = validate_with(json!({ "param_regularize": null, "param_coord_frame": "meg" }))
            .unwrap();
        assert_eq!(config.regularize, Regularize::None);
        assert_eq!(config.coord_frame, CoordFrame::Meg);
    }

    #[test]
    fn test_error_names_field_and_value() {
        let err = validate_with(json!({ "param_bad_condition": "panic" })).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("param_bad_condition"));
        assert!(msg.contains("panic"));
        assert_eq!(err.field(), Some("param_bad_condition"));
    }

    #[test]
    fn test_mag_scale_variants() {
        assert_eq!(
            validate_with(json!({ "param_mag_scale": "auto" })).unwrap().mag_scale,
            MagScale::Auto
        );
        assert_range(validate_with(json!({ "param_mag_scale": 0 })), "param_mag_scale");
        assert_range(validate_with(json!({ "param_mag_scale": "big" })), "param_mag_scale");
    }

    #[test]
    fn test_origin_variants() {
        assert_eq!(
            validate_with(json!({ "param_origin": [0.0, 0.0, 0.04] })).unwrap().origin,
            Origin::Fixed([0.0, 0.0, 0.04])
        );
        assert_range(validate_with(json!({ "param_origin": [0.0, 0.04] })), "param_origin");
    }

    #[test]
    fn test_destination_coordinates_and_file_conflict() {
        let fx = fixture();
        let dest = fx.fif.with_file_name("dest-raw.fif");
        std::fs::write(&dest, b"dest").unwrap();
        let raw = config::from_value(json!({
            "fif": fx.fif,
            "destination": dest,
            "param_destination": [0.0, 0.0, 0.04],
        }))
        .unwrap();
        match validate(&raw).unwrap_err() {
            MaxfilterError::ParameterConflict { first, second, .. } => {
                assert_eq!(first, "param_destination");
                assert_eq!(second, "destination");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_destination_file_only() {
        let fx = fixture();
        let dest = fx.fif.with_file_name("dest-raw.fif");
        let raw = config::from_value(json!({ "fif": fx.fif, "destination": dest })).unwrap();
        let config = validate(&raw).unwrap();
        assert_eq!(config.destination, Some(Destination::File(dest)));
    }

    #[test]
    fn test_st_only_requires_duration() {
        match validate_with(json!({ "param_st_only": true })).unwrap_err() {
            MaxfilterError::ParameterConflict { first, second, .. } => {
                assert_eq!(first, "param_st_only");
                assert_eq!(second, "param_st_duration");
            }
            other => panic!("unexpected error: {other}"),
        }
        let config = validate_with(json!({ "param_st_only": true, "param_st_duration": 10.0 }))
            .unwrap();
        assert!(config.st_only);
    }

    #[test]
    fn test_extended_proj_shapes() {
        let config = validate_with(json!({ "param_extended_proj": [[1.0, 0.0], [0.0, 1.0]] }))
            .unwrap();
        assert_eq!(config.extended_proj.len(), 2);
        assert_range(
            validate_with(json!({ "param_extended_proj": [[1.0, 0.0], [1.0]] })),
            "param_extended_proj",
        );
        assert_range(
            validate_with(json!({ "param_extended_proj": [[]] })),
            "param_extended_proj",
        );
    }

    #[test]
    fn test_skip_by_annotation_forms() {
        let config = validate_with(json!({ "param_skip_by_annotation": "bad" })).unwrap();
        assert_eq!(config.skip_by_annotation, vec!["bad"]);
        let config = validate_with(json!({ "param_skip_by_annotation": [] })).unwrap();
        assert!(config.skip_by_annotation.is_empty());
        assert_range(
            validate_with(json!({ "param_skip_by_annotation": [1, 2] })),
            "param_skip_by_annotation",
        );
    }
}
