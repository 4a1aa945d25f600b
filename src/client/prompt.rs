//! Prompt construction from curated lo-fi tags.
//!
//! A prompt always starts with the keyword `lofi` and a randomly chosen
//! tempo, followed by either a preset or a subgenre with optional mood and
//! atmosphere tags.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{ErrorCode, Result, ServiceError};
use crate::types::sanitize_prompt;

/// Keyword leading every prompt.
pub const FIXED_KEYWORD: &str = "lofi";

/// Common lo-fi tempos.
pub const TEMPOS_BPM: &[u32] = &[70, 72, 75, 78, 80];

/// Primary lo-fi subgenres.
pub const SUBGENRES: &[&str] = &[
    "Chillhop", "Hip-Hop", "Jazz", "House", "Vaporwave", "Ambient", "Synthwave", "Indie Rock",
    "Japan", "Funk", "Neo-Soul", "Trip-Hop", "Downtempo", "Lounge", "Classical", "Piano",
    "Bossa Nova", "Jazz Fusion", "Electronic", "IDM", "Retro Synth", "Dream Pop",
];

/// Mood tags.
pub const MOODS: &[&str] = &[
    "evening vibes", "morning vibes", "night vibes", "sunset", "study", "workout", "relax",
    "focus", "chill", "cozy", "sleep", "dreamy", "nostalgic", "melancholic", "uplifting",
    "playful", "romantic", "sad", "meditative", "energetic", "moody", "warm", "reflective",
];

/// Atmosphere tags.
pub const ATMOSPHERES: &[&str] = &[
    "cafe", "forest", "rain", "beach", "mountains", "city", "space", "train", "subway",
    "station", "library", "study room", "snow", "winter", "ocean", "river", "twilight",
    "sunrise", "sunset", "night", "cozy room", "vintage", "retro", "vinyl", "storm", "wind",
    "fireplace", "park", "street", "neon lights", "coffee shop", "campfire", "desert",
    "tropical", "loft", "attic",
];

/// Ready-made tag combinations.
pub const PRESETS: &[&str] = &[
    "Chillhop, focus, library",
    "Jazz, lounge, night",
    "Ambient, calm, forest",
    "Funk, relaxed, cozy room",
    "Synthwave, reflective, neon lights",
    "Piano, dreamy, night",
    "Trip-Hop, moody, subway",
    "Downtempo, chill, mountains",
    "Hip-Hop, energetic, New York City",
    "House, upbeat, street",
    "Neo-Soul, lively, cafe",
    "Bossa Nova, romantic, beach",
    "Synthwave, dreamy, space",
    "Vaporwave, chill, retro loft",
];

/// What the prompt is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSelection {
    /// One of [`PRESETS`], by text or 1-based index.
    Preset(String),
    /// A subgenre with any number of moods and atmospheres.
    Tags {
        subgenre: String,
        moods: Vec<String>,
        atmospheres: Vec<String>,
    },
}

/// A built prompt and the tempo drawn for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    /// Full prompt sent to the server.
    pub prompt: String,
    /// Tempo tag included in the prompt.
    pub tempo_bpm: u32,
}

impl BuiltPrompt {
    /// The prompt with its tempo tag removed.
    pub fn without_tempo(&self) -> String {
        let tempo = tempo_tag(self.tempo_bpm);
        self.prompt
            .split(", ")
            .filter(|part| *part != tempo)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Local filename for a track: `{YYYYmmdd_HHMMSS}_{tags}.wav`, tempo excluded.
    pub fn file_name(&self, timestamp: &str) -> String {
        format!("{}_{}.wav", timestamp, sanitize_prompt(&self.without_tempo()))
    }
}

fn tempo_tag(bpm: u32) -> String {
    format!("{} BPM", bpm)
}

fn canonical<'a>(catalog: &[&'a str], value: &str, kind: &str) -> Result<&'a str> {
    catalog
        .iter()
        .find(|entry| entry.eq_ignore_ascii_case(value.trim()))
        .copied()
        .ok_or_else(|| {
            ServiceError::new(
                ErrorCode::InvalidPrompt,
                format!("Unknown {} '{}' (see --list-tags)", kind, value.trim()),
            )
        })
}

fn resolve_preset(value: &str) -> Result<&'static str> {
    if let Ok(index) = value.trim().parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| PRESETS.get(i))
            .copied()
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::InvalidPrompt,
                    format!("Preset index {} is out of range 1..={}", index, PRESETS.len()),
                )
            });
    }
    canonical(PRESETS, value, "preset")
}

/// Builds a prompt, drawing the tempo from [`TEMPOS_BPM`].
pub fn build_prompt<R: Rng + ?Sized>(selection: &PromptSelection, rng: &mut R) -> Result<BuiltPrompt> {
    let tempo_bpm = TEMPOS_BPM.choose(rng).copied().unwrap_or(TEMPOS_BPM[0]);
    let mut parts = vec![FIXED_KEYWORD.to_string(), tempo_tag(tempo_bpm)];

    match selection {
        PromptSelection::Preset(value) => parts.push(resolve_preset(value)?.to_string()),
        PromptSelection::Tags {
            subgenre,
            moods,
            atmospheres,
        } => {
            parts.push(canonical(SUBGENRES, subgenre, "subgenre")?.to_string());
            for mood in moods {
                parts.push(canonical(MOODS, mood, "mood")?.to_string());
            }
            for atmosphere in atmospheres {
                parts.push(canonical(ATMOSPHERES, atmosphere, "atmosphere")?.to_string());
            }
        }
    }

    Ok(BuiltPrompt {
        prompt: parts.join(", "),
        tempo_bpm,
    })
}

/// Renders the tag catalogs for `--list-tags`.
pub fn catalog_listing() -> String {
    let mut out = String::new();
    let sections: [(&str, &[&str]); 4] = [
        ("Subgenres", SUBGENRES),
        ("Moods", MOODS),
        ("Atmospheres", ATMOSPHERES),
        ("Presets", PRESETS),
    ];
    for (title, entries) in sections {
        out.push_str(title);
        out.push_str(":\n");
        for (i, entry) in entries.iter().enumerate() {
            out.push_str(&format!("  {:>2}. {}\n", i + 1, entry));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tags(subgenre: &str, moods: &[&str], atmospheres: &[&str]) -> PromptSelection {
        PromptSelection::Tags {
            subgenre: subgenre.to_string(),
            moods: moods.iter().map(|s| s.to_string()).collect(),
            atmospheres: atmospheres.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn manual_prompt_layout() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let built = build_prompt(&tags("jazz", &["Cozy"], &["rain", "coffee shop"]), &mut rng).unwrap();

        assert!(TEMPOS_BPM.contains(&built.tempo_bpm));
        assert_eq!(
            built.prompt,
            format!("lofi, {} BPM, Jazz, cozy, rain, coffee shop", built.tempo_bpm)
        );
    }

    #[test]
    fn preset_by_name_or_index() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let by_index = build_prompt(&PromptSelection::Preset("2".into()), &mut rng).unwrap();
        assert!(by_index.prompt.ends_with(", Jazz, lounge, night"));

        let by_name =
            build_prompt(&PromptSelection::Preset("piano, dreamy, night".into()), &mut rng).unwrap();
        assert!(by_name.prompt.ends_with(", Piano, dreamy, night"));

        assert!(build_prompt(&PromptSelection::Preset("0".into()), &mut rng).is_err());
        assert!(build_prompt(&PromptSelection::Preset("99".into()), &mut rng).is_err());
    }

    #[test]
    fn unknown_tags_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let err = build_prompt(&tags("polka", &[], &[]), &mut rng).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt);
        assert!(err.message.contains("subgenre"));

        let err = build_prompt(&tags("Jazz", &["angry"], &[]), &mut rng).unwrap_err();
        assert!(err.message.contains("mood"));
    }

    #[test]
    fn file_name_excludes_tempo() {
        let built = BuiltPrompt {
            prompt: "lofi, 75 BPM, Jazz, cozy, rain".to_string(),
            tempo_bpm: 75,
        };
        assert_eq!(built.without_tempo(), "lofi, Jazz, cozy, rain");
        assert_eq!(
            built.file_name("20260101_120000"),
            "20260101_120000_lofi_jazz_cozy_rain.wav"
        );
    }

    #[test]
    fn tempo_drawn_from_catalog() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for _ in 0..50 {
            let built = build_prompt(&tags("Piano", &[], &[]), &mut rng).unwrap();
            assert!(TEMPOS_BPM.contains(&built.tempo_bpm));
        }
    }

    #[test]
    fn listing_contains_every_section() {
        let listing = catalog_listing();
        for title in ["Subgenres:", "Moods:", "Atmospheres:", "Presets:"] {
            assert!(listing.contains(title));
        }
        assert!(listing.contains("Bossa Nova"));
        assert!(listing.contains("neon lights"));
    }
}
