use serde::{Deserialize, Serialize};

/// How much prior conversation a history query may see.
///
/// Levels 1 and 2 scope by who will hear the upcoming response; levels 3
/// and 4 scope by who is currently speaking. Union levels admit anything
/// any member of the set witnessed, intersection levels only what every
/// member witnessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PrivacyLevel {
    Open = 0,
    ListenerUnion = 1,
    ListenerIntersection = 2,
    SpeakerUnion = 3,
    SpeakerIntersection = 4,
}

impl TryFrom<u8> for PrivacyLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Open),
            1 => Ok(Self::ListenerUnion),
            2 => Ok(Self::ListenerIntersection),
            3 => Ok(Self::SpeakerUnion),
            4 => Ok(Self::SpeakerIntersection),
            other => Err(format!("privacy level out of range: {other}")),
        }
    }
}

impl From<PrivacyLevel> for u8 {
    fn from(level: PrivacyLevel) -> u8 {
        level as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for raw in 0u8..=4 {
            let level = PrivacyLevel::try_from(raw).unwrap();
            assert_eq!(u8::from(level), raw);
        }
        assert!(PrivacyLevel::try_from(5).is_err());
    }
}
