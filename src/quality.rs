//! Decorative "code quality" annotations attached to build notifications.
//!
//! The generator is seeded with the commit hash, so every notification about
//! the same commit carries the same annotation. Each branch is an independent
//! draw on the same stream, evaluated in a fixed order.
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

pub const BUNDLED_QUIPS: &str = include_str!("../data/code_quality.txt");

/// Emoji codepoint ranges (inclusive) present in Unicode 8.
const EMOJI_RANGES: &[(u32, u32)] = &[(0x1F300, 0x1F579), (0x1F57B, 0x1F5A3), (0x1F5A5, 0x1F5FF)];

pub fn seeded_rng(seed: &str) -> StdRng {
    StdRng::from_seed(*blake3::hash(seed.as_bytes()).as_bytes())
}

/// Draw an emoji, weighting each range by its size.
pub fn random_emoji<R: Rng + ?Sized>(rng: &mut R) -> char {
    let cumulative: Vec<u32> = EMOJI_RANGES
        .iter()
        .scan(0, |acc, (lo, hi)| {
            *acc += hi - lo + 1;
            Some(*acc)
        })
        .collect();
    let total = cumulative.last().copied().unwrap_or(1);
    let point = rng.random_range(0..total);
    let idx = cumulative.partition_point(|&c| c <= point);
    let offset = if idx == 0 { point } else { point - cumulative[idx - 1] };
    char::from_u32(EMOJI_RANGES[idx].0 + offset).unwrap_or('\u{1F300}')
}

#[derive(Debug, Clone)]
pub struct QualityOracle {
    quips: Vec<String>,
}

impl QualityOracle {
    pub fn new(quips: Vec<String>) -> Self {
        Self { quips }
    }

    pub fn bundled() -> Self {
        Self::new(BUNDLED_QUIPS.lines().map(str::to_owned).collect())
    }

    /// Annotation for `seed`. `emojis` is the chat's custom emoji set when the
    /// platform has one; `contributors` the known contributor names.
    pub fn funny_message(
        &self,
        seed: &str,
        emojis: Option<&[String]>,
        contributors: Option<&[String]>,
    ) -> String {
        let mut rng = seeded_rng(seed);
        let n = self.quips.len() as u32;

        if rng.random_range(1..=30) == 1 {
            if let Some(emojis) = emojis {
                if rng.random_range(1..=2) == 1 {
                    if let Some(emoji) = emojis.choose(&mut rng) {
                        return emoji.clone();
                    }
                }
            }
            return random_emoji(&mut rng).to_string();
        }
        if rng.random_range(1..=n + 1) == 1 {
            return format!(
                "Rolling a d20 for a quality check: {}",
                rng.random_range(1..=20)
            );
        }
        if rng.random_range(1..=n + 2) <= 2 {
            if let Some(person) = contributors.and_then(|names| names.choose(&mut rng)) {
                let templates = [format!("Like a thing {person} wrote"), format!("{person}-approved")];
                if let Some(quip) = templates.choose(&mut rng) {
                    return quip.clone();
                }
            }
        }
        self.quips
            .choose(&mut rng)
            .map(|q| q.trim().to_string())
            .unwrap_or_else(|| "Unrated".to_string())
    }
}
