//! Model controls, tracks and card
//!
//! Parsed from the `(inputs, outputs, card)` triple a model returns, edited
//! by the UI, and serialised into the `{"data": [...]}` processing payload.
//! Payload order is the order the model declared its inputs.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::client::ControlsResponse;
use crate::error::{ErrorKind, HarpError, Result};

/// Model card shown before processing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelCard {
    pub name: String,
    pub description: String,
    pub author: String,
    pub tags: Vec<String>,
}

impl ModelCard {
    pub fn from_json(card: &Map<String, Value>) -> Result<Self> {
        let tags = card.get("tags").and_then(Value::as_array).ok_or_else(|| {
            HarpError::new(
                ErrorKind::JsonParseError,
                "Failed to load the tags array from JSON. tags is null.",
            )
        })?;

        Ok(Self {
            name: text(card.get("name")),
            description: text(card.get("description")),
            author: text(card.get("author")),
            tags: tags.iter().map(|tag| text(Some(tag))).collect(),
        })
    }
}

/// Type-specific part of an input component
#[derive(Debug, Clone, PartialEq)]
pub enum ControlKind {
    Slider {
        minimum: f64,
        maximum: f64,
        step: f64,
        value: f64,
    },
    NumberBox {
        min: f64,
        max: f64,
        value: f64,
    },
    Toggle {
        value: bool,
    },
    Text {
        value: String,
    },
    Combo {
        options: Vec<String>,
        value: String,
    },
    /// Audio input; `value` is the uploaded path once set
    AudioTrack {
        required: bool,
        value: Option<String>,
    },
    MidiTrack {
        required: bool,
        value: Option<String>,
    },
}

impl ControlKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlKind::Slider { .. } => "slider",
            ControlKind::NumberBox { .. } => "number_box",
            ControlKind::Toggle { .. } => "toggle",
            ControlKind::Text { .. } => "text_box",
            ControlKind::Combo { .. } => "dropdown",
            ControlKind::AudioTrack { .. } => "audio_track",
            ControlKind::MidiTrack { .. } => "midi_track",
        }
    }

    pub fn is_track(&self) -> bool {
        matches!(self, ControlKind::AudioTrack { .. } | ControlKind::MidiTrack { .. })
    }
}

/// A new value for a control
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// Remote path of an uploaded track, `None` to unset
    File(Option<String>),
}

/// One input component of a model
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    pub id: Uuid,
    pub label: String,
    pub info: String,
    pub kind: ControlKind,
}

impl Control {
    fn new(label: String, info: String, kind: ControlKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            info,
            kind,
        }
    }

    /// Replace the current value
    ///
    /// The value must fit the control: numbers for sliders and number boxes,
    /// one of the options for a combo, files for tracks.
    pub fn set_value(&mut self, value: ControlValue) -> Result<()> {
        match (&mut self.kind, value) {
            (ControlKind::Slider { value, .. }, ControlValue::Number(v))
            | (ControlKind::NumberBox { value, .. }, ControlValue::Number(v)) => *value = v,
            (ControlKind::Toggle { value }, ControlValue::Bool(v)) => *value = v,
            (ControlKind::Text { value }, ControlValue::Text(v)) => *value = v,
            (ControlKind::Combo { options, value }, ControlValue::Text(v)) => {
                if !options.contains(&v) {
                    return Err(HarpError::new(
                        ErrorKind::UnsupportedControlType,
                        format!("'{}' is not an option of '{}'", v, self.label),
                    ));
                }
                *value = v;
            }
            (ControlKind::AudioTrack { value, .. }, ControlValue::File(v))
            | (ControlKind::MidiTrack { value, .. }, ControlValue::File(v)) => *value = v,
            (kind, value) => {
                return Err(HarpError::new(
                    ErrorKind::UnsupportedControlType,
                    format!(
                        "Control '{}' ({}) does not accept {:?}",
                        self.label,
                        kind.type_name(),
                        value
                    ),
                ))
            }
        }
        Ok(())
    }

    /// Set the value from user text, converted to what the control holds
    pub fn set_from_str(&mut self, input: &str) -> Result<()> {
        let value = match &self.kind {
            ControlKind::Slider { .. } | ControlKind::NumberBox { .. } => {
                let number = input.trim().parse::<f64>().map_err(|_| {
                    HarpError::new(
                        ErrorKind::UnsupportedControlType,
                        format!("'{}' is not a number (control '{}')", input, self.label),
                    )
                })?;
                ControlValue::Number(number)
            }
            ControlKind::Toggle { .. } => ControlValue::Bool(string_to_bool(input)),
            ControlKind::Text { .. } | ControlKind::Combo { .. } => ControlValue::Text(input.to_string()),
            ControlKind::AudioTrack { .. } | ControlKind::MidiTrack { .. } => {
                ControlValue::File(Some(input.to_string()).filter(|s| !s.is_empty()))
            }
        };
        self.set_value(value)
    }

    /// Wire value of this control
    fn payload_value(&self) -> Value {
        match &self.kind {
            ControlKind::Slider { value, .. } | ControlKind::NumberBox { value, .. } => json!(value),
            ControlKind::Toggle { value } => json!(value),
            ControlKind::Text { value } | ControlKind::Combo { value, .. } => json!(value),
            ControlKind::AudioTrack { value, .. } | ControlKind::MidiTrack { value, .. } => match value {
                Some(path) => json!({"path": path, "meta": {"_type": "gradio.FileData"}}),
                None => Value::Null,
            },
        }
    }
}

/// Output track kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Midi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTrack {
    pub id: Uuid,
    pub label: String,
    pub info: String,
    pub kind: TrackKind,
}

/// Input components in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlList {
    controls: Vec<Control>,
}

impl ControlList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, control: Control) {
        self.controls.push(control);
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Control> {
        self.controls.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Control> {
        self.controls.iter_mut()
    }

    pub fn get(&self, id: Uuid) -> Option<&Control> {
        self.controls.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Control> {
        self.controls.iter_mut().find(|c| c.id == id)
    }

    pub fn find_by_label_mut(&mut self, label: &str) -> Option<&mut Control> {
        self.controls.iter_mut().find(|c| c.label == label)
    }

    /// Controls proper (sliders, boxes, toggles, combos)
    pub fn parameters(&self) -> impl Iterator<Item = &Control> {
        self.controls.iter().filter(|c| !c.kind.is_track())
    }

    /// Audio and MIDI input tracks
    pub fn tracks(&self) -> impl Iterator<Item = &Control> {
        self.controls.iter().filter(|c| c.kind.is_track())
    }
}

/// Everything `load` extracts from a controls response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedControls {
    pub card: ModelCard,
    pub controls: ControlList,
    pub outputs: Vec<OutputTrack>,
}

/// Payload shape expected by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFlavor {
    /// Raw values in declaration order
    Gradio,
    /// `{label, value}` pairs, MIDI inputs dropped
    Stability,
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(Value::Bool(b)) => if *b { "1" } else { "0" }.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Numbers arrive as JSON numbers or numeric strings; anything else is 0
fn loose_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

fn string_to_bool(input: &str) -> bool {
    matches!(input.to_lowercase().as_str(), "true" | "1" | "yes" | "y")
}

fn component_object<'a>(component: &'a Value) -> Result<&'a Map<String, Value>> {
    component.as_object().ok_or_else(|| {
        HarpError::new(
            ErrorKind::JsonParseError,
            "Failed to load controls from JSON. control is not an object.",
        )
    })
}

fn parse_input(obj: &Map<String, Value>) -> Result<Option<Control>> {
    let component_type = text(obj.get("type"));
    let label = text(obj.get("label"));
    let info = text(obj.get("info"));
    let required = string_to_bool(&text(obj.get("required")));

    let kind = match component_type.as_str() {
        "audio_track" => ControlKind::AudioTrack { required, value: None },
        "midi_track" => ControlKind::MidiTrack { required, value: None },
        "slider" => ControlKind::Slider {
            minimum: loose_number(obj.get("minimum").or_else(|| obj.get("min"))),
            maximum: loose_number(obj.get("maximum").or_else(|| obj.get("max"))),
            step: loose_number(obj.get("step")),
            value: loose_number(obj.get("value")),
        },
        "number_box" => ControlKind::NumberBox {
            min: loose_number(obj.get("min").or_else(|| obj.get("minimum"))),
            max: loose_number(obj.get("max").or_else(|| obj.get("maximum"))),
            value: loose_number(obj.get("value")),
        },
        "toggle" => ControlKind::Toggle {
            value: matches!(obj.get("value"), Some(Value::Bool(true))) || text(obj.get("value")) == "1",
        },
        "text_box" => ControlKind::Text {
            value: text(obj.get("value")),
        },
        "dropdown" => {
            let choices = obj.get("choices").and_then(Value::as_array).ok_or_else(|| {
                HarpError::new(
                    ErrorKind::JsonParseError,
                    format!("Failed to load controls from JSON. dropdown '{}' has no choices.", label),
                )
            })?;
            // Gradio sends (display, value) pairs
            let options: Vec<String> = choices
                .iter()
                .map(|choice| match choice {
                    Value::Array(pair) => text(pair.first()),
                    other => text(Some(other)),
                })
                .collect();
            let Some(first) = options.first().cloned() else {
                log::warn!("parse_controls: dropdown '{}' has no options, skipped", label);
                return Ok(None);
            };
            let value = match obj.get("value") {
                Some(value) => text(Some(value)),
                None => first,
            };
            ControlKind::Combo { options, value }
        }
        other => {
            log::warn!("parse_controls: unknown control type '{}', skipped", other);
            return Ok(None);
        }
    };

    log::debug!("parse_controls: {} '{}' added", kind.type_name(), label);
    Ok(Some(Control::new(label, info, kind)))
}

fn parse_output(obj: &Map<String, Value>) -> Option<OutputTrack> {
    let kind = match text(obj.get("type")).as_str() {
        "audio_track" => TrackKind::Audio,
        "midi_track" => TrackKind::Midi,
        other => {
            log::warn!("parse_controls: unknown output type '{}', skipped", other);
            return None;
        }
    };
    Some(OutputTrack {
        id: Uuid::new_v4(),
        label: text(obj.get("label")),
        info: text(obj.get("info")),
        kind,
    })
}

/// Build card, controls and output tracks from a controls response
pub fn parse_controls(response: &ControlsResponse) -> Result<ParsedControls> {
    let card = ModelCard::from_json(&response.card)?;

    let mut controls = ControlList::new();
    for component in &response.inputs {
        if let Some(control) = parse_input(component_object(component)?)? {
            controls.push(control);
        }
    }

    let mut outputs = Vec::new();
    for component in &response.outputs {
        outputs.extend(parse_output(component_object(component)?));
    }

    Ok(ParsedControls {
        card,
        controls,
        outputs,
    })
}

/// Serialise control values into a processing payload
pub fn build_payload(controls: &ControlList, flavor: PayloadFlavor) -> Value {
    let data: Vec<Value> = controls
        .iter()
        .filter_map(|control| match flavor {
            PayloadFlavor::Gradio => Some(control.payload_value()),
            PayloadFlavor::Stability => match control.kind {
                ControlKind::MidiTrack { .. } => None,
                ControlKind::AudioTrack { .. } => Some(json!({
                    "label": "input",
                    "value": control.payload_value(),
                })),
                _ => Some(json!({
                    "label": control.label,
                    "value": control.payload_value(),
                })),
            },
        })
        .collect();
    json!({ "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(inputs: Value, outputs: Value) -> ControlsResponse {
        ControlsResponse {
            inputs: inputs.as_array().unwrap().clone(),
            outputs: outputs.as_array().unwrap().clone(),
            card: json!({"name": "Pitch Shifter", "description": "shifts", "author": "acme", "tags": ["a", "b"]})
                .as_object()
                .unwrap()
                .clone(),
        }
    }

    #[test]
    fn test_parse_every_control_type() {
        let parsed = parse_controls(&response(
            json!([
                {"type": "audio_track", "label": "Input", "required": "true"},
                {"type": "midi_track", "label": "Notes"},
                {"type": "slider", "label": "gain", "minimum": 0, "maximum": "1", "step": 0.01, "value": "0.5"},
                {"type": "number_box", "label": "seed", "min": 0, "max": 100, "value": 7},
                {"type": "toggle", "label": "loud", "value": true},
                {"type": "text_box", "label": "prompt", "value": "drums"},
                {"type": "dropdown", "label": "mode", "choices": [["fast", "fast"], ["slow", "slow"]]}
            ]),
            json!([{"type": "audio_track", "label": "Out"}, {"type": "midi_track", "label": "Midi"}]),
        ))
        .unwrap();

        assert_eq!(parsed.card.name, "Pitch Shifter");
        assert_eq!(parsed.card.tags, vec!["a", "b"]);

        let kinds: Vec<_> = parsed.controls.iter().map(|c| c.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ControlKind::AudioTrack { required: true, value: None },
                ControlKind::MidiTrack { required: false, value: None },
                ControlKind::Slider { minimum: 0.0, maximum: 1.0, step: 0.01, value: 0.5 },
                ControlKind::NumberBox { min: 0.0, max: 100.0, value: 7.0 },
                ControlKind::Toggle { value: true },
                ControlKind::Text { value: "drums".to_string() },
                ControlKind::Combo {
                    options: vec!["fast".to_string(), "slow".to_string()],
                    value: "fast".to_string()
                },
            ]
        );
        assert_eq!(parsed.controls.parameters().count(), 5);
        assert_eq!(parsed.controls.tracks().count(), 2);
        assert_eq!(parsed.outputs[1].kind, TrackKind::Midi);

        let ids: std::collections::HashSet<_> = parsed.controls.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), parsed.controls.len());
    }

    #[test]
    fn test_lenient_inputs() {
        let parsed = parse_controls(&response(
            json!([
                {"type": "slider", "label": "s", "min": "2", "max": 4, "step": "x", "value": null},
                {"type": "toggle", "label": "t", "value": "1"},
                {"type": "toggle", "label": "f", "value": "yes"},
                {"type": "dropdown", "label": "empty", "choices": []},
                {"type": "image", "label": "unknown"}
            ]),
            json!([]),
        ))
        .unwrap();

        let kinds: Vec<_> = parsed.controls.iter().map(|c| c.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ControlKind::Slider { minimum: 2.0, maximum: 4.0, step: 0.0, value: 0.0 },
                ControlKind::Toggle { value: true },
                ControlKind::Toggle { value: false },
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_controls(&response(json!(["slider"]), json!([]))).unwrap_err();
        assert_eq!(err.dev_message, "Failed to load controls from JSON. control is not an object.");

        let err = parse_controls(&response(json!([{"type": "dropdown", "label": "d"}]), json!([]))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::JsonParseError);

        let mut missing_tags = response(json!([]), json!([]));
        missing_tags.card.remove("tags");
        let err = parse_controls(&missing_tags).unwrap_err();
        assert_eq!(err.dev_message, "Failed to load the tags array from JSON. tags is null.");
    }

    #[test]
    fn test_set_values() {
        let mut parsed = parse_controls(&response(
            json!([
                {"type": "slider", "label": "gain", "minimum": 0, "maximum": 1, "step": 0.1, "value": 0.5},
                {"type": "dropdown", "label": "mode", "choices": ["a", "b"], "value": "a"},
                {"type": "toggle", "label": "on", "value": false}
            ]),
            json!([]),
        ))
        .unwrap();
        let controls = &mut parsed.controls;

        controls.find_by_label_mut("gain").unwrap().set_from_str("0.75").unwrap();
        controls.find_by_label_mut("mode").unwrap().set_from_str("b").unwrap();
        controls.find_by_label_mut("on").unwrap().set_from_str("y").unwrap();
        assert!(controls.find_by_label_mut("mode").unwrap().set_from_str("c").is_err());
        assert!(controls.find_by_label_mut("gain").unwrap().set_from_str("loud").is_err());

        let err = controls
            .find_by_label_mut("gain")
            .unwrap()
            .set_value(ControlValue::Bool(true))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedControlType);

        assert_eq!(
            build_payload(controls, PayloadFlavor::Gradio),
            json!({"data": [0.75, "b", true]})
        );
    }

    #[test]
    fn test_payload_flavors() {
        let mut parsed = parse_controls(&response(
            json!([
                {"type": "audio_track", "label": "Input"},
                {"type": "midi_track", "label": "Notes"},
                {"type": "text_box", "label": "prompt", "value": "x"}
            ]),
            json!([]),
        ))
        .unwrap();

        assert_eq!(
            build_payload(&parsed.controls, PayloadFlavor::Gradio),
            json!({"data": [null, null, "x"]})
        );

        let track_id = parsed.controls.tracks().next().unwrap().id;
        parsed
            .controls
            .get_mut(track_id)
            .unwrap()
            .set_value(ControlValue::File(Some("/tmp/gradio/in.wav".to_string())))
            .unwrap();

        assert_eq!(
            build_payload(&parsed.controls, PayloadFlavor::Gradio)["data"][0],
            json!({"path": "/tmp/gradio/in.wav", "meta": {"_type": "gradio.FileData"}})
        );
        assert_eq!(
            build_payload(&parsed.controls, PayloadFlavor::Stability),
            json!({"data": [
                {"label": "input", "value": {"path": "/tmp/gradio/in.wav", "meta": {"_type": "gradio.FileData"}}},
                {"label": "prompt", "value": "x"}
            ]})
        );
    }
}
