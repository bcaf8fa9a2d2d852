use bevy::input::keyboard::KeyCode;
use bevy::input::mouse::MouseButton;
use serde::{Deserialize, Serialize};

/// Input delivered to the simulation each frame. Serialized as the event
/// tables scripts receive, e.g. `{"type": "key_down", "key": "left"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: String },
    KeyUp { key: String },
    MouseDown { button: String, x: f32, y: f32 },
    MouseUp { button: String, x: f32, y: f32 },
    MouseMove { x: f32, y: f32 },
    /// Consumed by the host, never handed to scripts.
    Quit,
}

impl InputEvent {
    pub fn is_quit(&self) -> bool {
        matches!(self, Self::Quit)
    }

    pub fn key_down(key: impl Into<String>) -> Self {
        Self::KeyDown { key: key.into() }
    }
}

/// Events as the JSON array handed to per-object `update` hooks.
pub fn events_to_json(events: &[InputEvent]) -> serde_json::Value {
    serde_json::Value::Array(
        events
            .iter()
            .filter(|e| !e.is_quit())
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect(),
    )
}

/// Script-facing name of a key, lower-case. Keys scripts have no use for map
/// to `None`.
pub fn key_name(key: KeyCode) -> Option<&'static str> {
    let name = match key {
        KeyCode::ArrowLeft => "left",
        KeyCode::ArrowRight => "right",
        KeyCode::ArrowUp => "up",
        KeyCode::ArrowDown => "down",
        KeyCode::Space => "space",
        KeyCode::Enter => "return",
        KeyCode::Escape => "escape",
        KeyCode::Tab => "tab",
        KeyCode::Backspace => "backspace",
        KeyCode::ShiftLeft | KeyCode::ShiftRight => "shift",
        KeyCode::ControlLeft | KeyCode::ControlRight => "ctrl",
        KeyCode::AltLeft | KeyCode::AltRight => "alt",
        KeyCode::KeyA => "a",
        KeyCode::KeyB => "b",
        KeyCode::KeyC => "c",
        KeyCode::KeyD => "d",
        KeyCode::KeyE => "e",
        KeyCode::KeyF => "f",
        KeyCode::KeyG => "g",
        KeyCode::KeyH => "h",
        KeyCode::KeyI => "i",
        KeyCode::KeyJ => "j",
        KeyCode::KeyK => "k",
        KeyCode::KeyL => "l",
        KeyCode::KeyM => "m",
        KeyCode::KeyN => "n",
        KeyCode::KeyO => "o",
        KeyCode::KeyP => "p",
        KeyCode::KeyQ => "q",
        KeyCode::KeyR => "r",
        KeyCode::KeyS => "s",
        KeyCode::KeyT => "t",
        KeyCode::KeyU => "u",
        KeyCode::KeyV => "v",
        KeyCode::KeyW => "w",
        KeyCode::KeyX => "x",
        KeyCode::KeyY => "y",
        KeyCode::KeyZ => "z",
        KeyCode::Digit0 => "0",
        KeyCode::Digit1 => "1",
        KeyCode::Digit2 => "2",
        KeyCode::Digit3 => "3",
        KeyCode::Digit4 => "4",
        KeyCode::Digit5 => "5",
        KeyCode::Digit6 => "6",
        KeyCode::Digit7 => "7",
        KeyCode::Digit8 => "8",
        KeyCode::Digit9 => "9",
        _ => return None,
    };
    Some(name)
}

pub fn mouse_button_name(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "left",
        MouseButton::Right => "right",
        MouseButton::Middle => "middle",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_as_tagged_tables() {
        let events = vec![
            InputEvent::key_down("left"),
            InputEvent::MouseDown {
                button: "left".into(),
                x: 3.0,
                y: 4.0,
            },
            InputEvent::Quit,
        ];
        assert_eq!(
            events_to_json(&events),
            json!([
                {"type": "key_down", "key": "left"},
                {"type": "mouse_down", "button": "left", "x": 3.0, "y": 4.0},
            ])
        );
    }

    #[test]
    fn key_names_cover_arrows_and_letters() {
        assert_eq!(key_name(KeyCode::ArrowLeft), Some("left"));
        assert_eq!(key_name(KeyCode::KeyW), Some("w"));
        assert_eq!(key_name(KeyCode::F13), None);
    }
}
