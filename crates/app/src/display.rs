use metronome_core::{AudioOutput, ClipHandle, EngineEvent, Result};

/// Audio output for terminals without a sound device: logs each clip.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalOutput;

impl AudioOutput for TerminalOutput {
    fn play(&self, clip: &ClipHandle) -> Result<()> {
        tracing::debug!(clip = clip.name(), samples = clip.samples().len(), "play");
        Ok(())
    }
}

/// Renders one measure with the played beat highlighted, e.g. `● ○ ○ ○`.
pub fn beat_bar(beat: u32, beats: u32) -> String {
    (0..beats)
        .map(|index| if index == beat { "●" } else { "○" })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One line of terminal output for `event`, if it is worth showing.
pub fn describe(event: &EngineEvent, beats: u32) -> Option<String> {
    match event {
        EngineEvent::Click { beat, accent } => {
            let marker = if *accent { ">" } else { " " };
            Some(format!("{marker} {}  {}/{beats}", beat_bar(*beat, beats), beat + 1))
        }
        EngineEvent::BpmChanged { bpm } => Some(format!("tempo {bpm} bpm")),
        EngineEvent::TimeSignatureChanged { signature } => {
            Some(format!("signature {signature} ({})", signature.name()))
        }
        EngineEvent::PlayingChanged { .. } | EngineEvent::BeatChanged { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_the_played_beat() {
        assert_eq!(beat_bar(0, 4), "● ○ ○ ○");
        assert_eq!(beat_bar(2, 3), "○ ○ ●");
    }

    #[test]
    fn marks_accented_clicks() {
        let line = describe(&EngineEvent::Click { beat: 0, accent: true }, 2).unwrap();
        assert_eq!(line, "> ● ○  1/2");
        assert!(describe(&EngineEvent::BeatChanged { beat: 1 }, 2).is_none());
    }
}
