use std::{borrow::Cow, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{MetronomeError, Result};

/// Beat count per measure plus a descriptive note value.
///
/// Equality is by value: two signatures are equal when beats, note value and
/// name all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SignatureFields")]
pub struct TimeSignature {
    beats: u32,
    note_value: u32,
    name: Cow<'static, str>,
}

impl TimeSignature {
    pub const COMMON: Self = Self::preset(4, 4, "Common");
    pub const WALTZ: Self = Self::preset(3, 4, "Waltz");
    pub const MARCH: Self = Self::preset(2, 4, "March");
    pub const COMPOUND: Self = Self::preset(6, 8, "Compound");
    pub const FIVE_FOUR: Self = Self::preset(5, 4, "Five Four");
    pub const SEVEN_EIGHT: Self = Self::preset(7, 8, "Seven Eight");

    const fn preset(beats: u32, note_value: u32, name: &'static str) -> Self {
        Self {
            beats,
            note_value,
            name: Cow::Borrowed(name),
        }
    }

    /// Builds a custom signature. Both numbers must be at least one.
    pub fn new(beats: u32, note_value: u32, name: impl Into<String>) -> Result<Self> {
        if beats == 0 {
            return Err(MetronomeError::invalid(
                "a time signature needs at least one beat",
            ));
        }
        if note_value == 0 {
            return Err(MetronomeError::invalid("note value must be at least one"));
        }
        Ok(Self {
            beats,
            note_value,
            name: Cow::Owned(name.into()),
        })
    }

    pub fn beats(&self) -> u32 {
        self.beats
    }

    pub fn note_value(&self) -> u32 {
        self.note_value
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::COMMON
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats, self.note_value)
    }
}

/// Parses `"beats/note"`, preferring the catalog entry with the same numbers.
impl FromStr for TimeSignature {
    type Err = MetronomeError;

    fn from_str(s: &str) -> Result<Self> {
        let (beats, note_value) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| MetronomeError::invalid(format!("expected `beats/note`, got `{s}`")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| MetronomeError::invalid(format!("`{part}` is not a beat count")))
        };
        let (beats, note_value) = (parse(beats)?, parse(note_value)?);

        if let Some(known) = catalog()
            .iter()
            .find(|sig| sig.beats == beats && sig.note_value == note_value)
        {
            return Ok(known.clone());
        }
        Self::new(beats, note_value, format!("{beats}/{note_value}"))
    }
}

#[derive(Deserialize)]
struct SignatureFields {
    beats: u32,
    note_value: u32,
    name: String,
}

impl TryFrom<SignatureFields> for TimeSignature {
    type Error = MetronomeError;

    fn try_from(fields: SignatureFields) -> Result<Self> {
        Self::new(fields.beats, fields.note_value, fields.name)
    }
}

static CATALOG: [TimeSignature; 6] = [
    TimeSignature::COMMON,
    TimeSignature::WALTZ,
    TimeSignature::MARCH,
    TimeSignature::COMPOUND,
    TimeSignature::FIVE_FOUR,
    TimeSignature::SEVEN_EIGHT,
];

/// Predefined signatures in presentation order.
pub fn catalog() -> &'static [TimeSignature] {
    &CATALOG
}

/// Position inside the current measure.
///
/// `current` is always a valid index into the signature in effect: the
/// engine resets the cycle whenever the signature changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BeatCycle {
    current: u32,
}

impl BeatCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }

    pub fn is_accent_beat(&self) -> bool {
        self.current == 0
    }

    /// Moves to the next beat, wrapping at the end of the measure.
    pub fn advance(&mut self, signature: &TimeSignature) {
        self.current = (self.current % signature.beats + 1) % signature.beats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_every_beat() {
        for signature in catalog() {
            let mut cycle = BeatCycle::new();
            let mut seen = Vec::new();
            for _ in 0..signature.beats() * 3 {
                seen.push((cycle.current(), cycle.is_accent_beat()));
                cycle.advance(signature);
            }

            for (step, (beat, accent)) in seen.into_iter().enumerate() {
                assert_eq!(beat, step as u32 % signature.beats());
                assert_eq!(accent, beat == 0);
            }
        }
    }

    #[test]
    fn single_beat_measure_accents_every_beat() {
        let one = TimeSignature::new(1, 4, "One").unwrap();
        let mut cycle = BeatCycle::new();
        for _ in 0..4 {
            assert!(cycle.is_accent_beat());
            cycle.advance(&one);
        }
    }

    #[test]
    fn reset_returns_to_downbeat() {
        let mut cycle = BeatCycle::new();
        cycle.advance(&TimeSignature::COMMON);
        cycle.advance(&TimeSignature::COMMON);
        assert_eq!(cycle.current(), 2);
        cycle.reset();
        assert_eq!(cycle.current(), 0);
        assert!(cycle.is_accent_beat());
    }

    #[test]
    fn advance_under_shorter_signature_stays_in_range() {
        let mut cycle = BeatCycle::new();
        for _ in 0..6 {
            cycle.advance(&TimeSignature::SEVEN_EIGHT);
        }
        cycle.advance(&TimeSignature::MARCH);
        assert!(cycle.current() < 2);
    }

    #[test]
    fn equality_is_by_value() {
        let custom = TimeSignature::new(4, 4, "Common").unwrap();
        assert_eq!(custom, TimeSignature::COMMON);
        assert_ne!(
            TimeSignature::new(4, 4, "Four").unwrap(),
            TimeSignature::COMMON
        );
    }

    #[test]
    fn rejects_empty_measures() {
        assert!(TimeSignature::new(0, 4, "None").is_err());
        assert!(TimeSignature::new(3, 0, "Odd").is_err());
        assert!("0/4".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn parses_catalog_and_custom_signatures() {
        assert_eq!("6/8".parse::<TimeSignature>().unwrap(), TimeSignature::COMPOUND);
        assert_eq!(" 3 / 4 ".parse::<TimeSignature>().unwrap().name(), "Waltz");

        let custom: TimeSignature = "11/16".parse().unwrap();
        assert_eq!(custom.beats(), 11);
        assert_eq!(custom.note_value(), 16);
        assert_eq!(custom.name(), "11/16");
        assert_eq!(custom.to_string(), "11/16");

        assert!("waltz".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn catalog_order_is_stable() {
        let labels: Vec<String> = catalog().iter().map(ToString::to_string).collect();
        assert_eq!(labels, ["4/4", "3/4", "2/4", "6/8", "5/4", "7/8"]);
    }

    #[test]
    fn deserialization_validates_beats() {
        let sig: TimeSignature =
            serde_json::from_str(r#"{ "beats": 5, "note_value": 4, "name": "Five Four" }"#)
                .unwrap();
        assert_eq!(sig, TimeSignature::FIVE_FOUR);

        assert!(serde_json::from_str::<TimeSignature>(
            r#"{ "beats": 0, "note_value": 4, "name": "Empty" }"#
        )
        .is_err());
    }
}
