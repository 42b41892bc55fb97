use serde::{Deserialize, Serialize};

/// One answer choice on the form, identified by its column index within a
/// question row. Choice 0 is "A", choice 1 is "B", and so on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Choice(u8);

impl Choice {
    pub fn from_index(index: usize) -> Option<Self> {
        if index < 26 {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl From<&str> for Choice {
    fn from(s: &str) -> Self {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c @ 'A'..='Z'), None) => Self(c as u8 - b'A'),
            _ => panic!("Invalid choice letter: {}", s),
        }
    }
}

impl<'de> Deserialize<'de> for Choice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c @ 'A'..='Z'), None) => Ok(Self(c as u8 - b'A')),
            _ => Err(serde::de::Error::custom(format!(
                "invalid choice letter: {:?}",
                s
            ))),
        }
    }
}

impl Serialize for Choice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.letter().to_string())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_letters_are_sequential() {
        let a = Choice::from_index(0).unwrap();
        let d = Choice::from_index(3).unwrap();
        assert_eq!(a.letter(), 'A');
        assert_eq!(d.letter(), 'D');
        assert!(a < d);
    }

    #[test]
    fn choice_round_trips_through_json() {
        let b = Choice::from("B");
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "\"B\"");
        let back: Choice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn choice_rejects_multi_letter_strings() {
        assert!(serde_json::from_str::<Choice>("\"AB\"").is_err());
        assert!(serde_json::from_str::<Choice>("\"a\"").is_err());
    }
}
