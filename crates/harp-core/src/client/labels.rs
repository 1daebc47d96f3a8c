//! Output labels returned by pyharp models
//!
//! A `pyharp.LabelList` output carries timed annotations. Every label has a
//! time and text; the remaining fields are optional and silently ignored when
//! the JSON value has the wrong type.

use serde_json::{Map, Value};

use crate::error::{ErrorKind, HarpError, Result};

/// Type-specific part of a label
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LabelKind {
    #[default]
    Output,
    Audio { amplitude: Option<f32> },
    Spectrogram { frequency: Option<f32> },
    Midi { pitch: Option<f32> },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputLabel {
    /// Start time in seconds
    pub t: f32,
    pub label: String,
    pub duration: Option<f32>,
    pub description: Option<String>,
    /// Packed ARGB colour; 0 means "use the default"
    pub color: Option<i64>,
    pub link: Option<String>,
    pub kind: LabelKind,
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f32> {
    obj.get(key).and_then(Value::as_f64).map(|v| v as f32)
}

fn string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decode one label object
pub fn parse_label(obj: &Map<String, Value>) -> Result<OutputLabel> {
    let label_type = obj.get("label_type").and_then(Value::as_str).unwrap_or_default();
    let kind = match label_type {
        "AudioLabel" => LabelKind::Audio {
            amplitude: number(obj, "amplitude"),
        },
        "SpectrogramLabel" => LabelKind::Spectrogram {
            frequency: number(obj, "frequency"),
        },
        "MidiLabel" => LabelKind::Midi {
            pitch: number(obj, "pitch"),
        },
        "OutputLabel" => LabelKind::Output,
        other => {
            return Err(HarpError::new(
                ErrorKind::UnknownLabelType,
                format!("Unknown label type: {}", other),
            ))
        }
    };

    Ok(OutputLabel {
        t: number(obj, "t").unwrap_or_default(),
        label: string(obj, "label").unwrap_or_default(),
        duration: number(obj, "duration"),
        description: string(obj, "description"),
        color: obj
            .get("color")
            .and_then(Value::as_i64)
            .filter(|&color| color != 0),
        link: string(obj, "link"),
        kind,
    })
}

/// Decode the `labels` array of a `pyharp.LabelList` output
pub fn parse_label_list(output: &Map<String, Value>) -> Result<Vec<OutputLabel>> {
    let labels = output.get("labels").and_then(Value::as_array).ok_or_else(|| {
        HarpError::new(
            ErrorKind::MissingJsonKey,
            "LabelList output does not have a labels array",
        )
    })?;

    labels
        .iter()
        .map(|label| {
            let obj = label.as_object().ok_or_else(|| {
                HarpError::new(ErrorKind::JsonParseError, "Label entry is not an object")
            })?;
            parse_label(obj)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_all_label_types() {
        let output = as_map(json!({
            "meta": {"_type": "pyharp.LabelList"},
            "labels": [
                {"label_type": "AudioLabel", "t": 1.5, "label": "kick", "amplitude": 0.8},
                {"label_type": "SpectrogramLabel", "t": 2, "label": "tone", "frequency": 440},
                {"label_type": "MidiLabel", "t": 0.0, "label": "C4", "pitch": 60},
                {"label_type": "OutputLabel", "t": 3.0, "label": "end"}
            ]
        }));
        let labels = parse_label_list(&output).unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels[0].kind, LabelKind::Audio { amplitude: Some(0.8) });
        assert_eq!(labels[0].t, 1.5);
        assert_eq!(labels[1].kind, LabelKind::Spectrogram { frequency: Some(440.0) });
        assert_eq!(labels[2].kind, LabelKind::Midi { pitch: Some(60.0) });
        assert_eq!(labels[3].kind, LabelKind::Output);
        assert_eq!(labels[3].label, "end");
    }

    #[test]
    fn test_optional_fields() {
        let label = parse_label(&as_map(json!({
            "label_type": "OutputLabel",
            "t": 0.5,
            "label": "x",
            "duration": 2.0,
            "description": "desc",
            "color": 0,
            "link": "https://example.com"
        })))
        .unwrap();
        assert_eq!(label.duration, Some(2.0));
        assert_eq!(label.description.as_deref(), Some("desc"));
        assert_eq!(label.color, None);
        assert_eq!(label.link.as_deref(), Some("https://example.com"));

        let label = parse_label(&as_map(json!({
            "label_type": "AudioLabel",
            "t": "oops",
            "label": 5,
            "amplitude": "loud",
            "color": 16711680
        })))
        .unwrap();
        assert_eq!(label.t, 0.0);
        assert_eq!(label.label, "");
        assert_eq!(label.kind, LabelKind::Audio { amplitude: None });
        assert_eq!(label.color, Some(16711680));
    }

    #[test]
    fn test_unknown_label_type() {
        let output = as_map(json!({"labels": [{"label_type": "ImageLabel", "t": 0}]}));
        let err = parse_label_list(&output).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownLabelType);
        assert_eq!(err.dev_message, "Unknown label type: ImageLabel");
    }

    #[test]
    fn test_missing_labels_array() {
        let err = parse_label_list(&as_map(json!({"meta": {}}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingJsonKey);
    }
}
