use serde::Deserialize;

/// One update from the game mod. Missing keys read as zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameFrame {
    pub piston: i64,
    pub vibe: i64,
    pub progress: f64,
    pub animation_hash: i64,
}

impl GameFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_zero() {
        let frame = GameFrame::parse(r#"{"piston": 2}"#).unwrap();
        assert_eq!(
            frame,
            GameFrame {
                piston: 2,
                ..Default::default()
            }
        );
    }

    #[test]
    fn extra_fields_are_ignored() {
        let frame =
            GameFrame::parse(r#"{"vibe": 1, "progress": 0.25, "animation_hash": -7, "scene": "x"}"#)
                .unwrap();
        assert_eq!(frame.vibe, 1);
        assert_eq!(frame.progress, 0.25);
        assert_eq!(frame.animation_hash, -7);
    }

    #[test]
    fn non_object_is_an_error() {
        assert!(GameFrame::parse("[1, 2]").is_err());
        assert!(GameFrame::parse("not json").is_err());
    }
}
