//! Extracting batch counts from engine output.
//!
//! The engine prints free-form text. Counts are taken from, in order of
//! preference:
//!
//! 1. a line containing [`SUMMARY_MARKER`]
//! 2. the last line containing [`PROGRESS_MARKER`]
//! 3. the first line carrying both a games and a positions count
//!
//! Anything else yields zero counts.

use std::sync::LazyLock;

use regex::Regex;

pub const SUMMARY_MARKER: &str = "datagen summary";
pub const PROGRESS_MARKER: &str = "datagen progress";

static GAMES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bgames?\s*[=:]\s*(\d+)").expect("Invalid games regex"));

static POSITIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpositions?\s*[=:]\s*(\d+)").expect("Invalid positions regex")
});

/// `"10 games, 1234 positions"`, singular forms included
static COUNT_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s+games?\b.*?(\d+)\s+positions?\b").expect("Invalid count regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub games: u64,
    pub positions: u64,
}

impl BatchCounts {
    pub fn new(games: u64, positions: u64) -> Self {
        Self { games, positions }
    }
}

fn capture_u64(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Counts on a single line, if it carries both.
fn counts_in_line(line: &str) -> Option<BatchCounts> {
    if let (Some(games), Some(positions)) =
        (capture_u64(&GAMES_RE, line), capture_u64(&POSITIONS_RE, line))
    {
        return Some(BatchCounts::new(games, positions));
    }
    let caps = COUNT_FIRST_RE.captures(line)?;
    Some(BatchCounts::new(
        caps.get(1)?.as_str().parse().ok()?,
        caps.get(2)?.as_str().parse().ok()?,
    ))
}

/// Parse games and positions from engine stdout. Never fails.
pub fn parse_engine_output(stdout: &str) -> BatchCounts {
    let lines: Vec<&str> = stdout.lines().collect();

    let summary = lines
        .iter()
        .filter(|l| l.contains(SUMMARY_MARKER))
        .find_map(|l| counts_in_line(l));
    if let Some(counts) = summary {
        return counts;
    }

    let progress = lines
        .iter()
        .rev()
        .filter(|l| l.contains(PROGRESS_MARKER))
        .find_map(|l| counts_in_line(l));
    if let Some(counts) = progress {
        return counts;
    }

    lines
        .iter()
        .find_map(|l| counts_in_line(l))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_wins_over_progress() {
        let out = "datagen progress: games=3 positions=100\n\
                   datagen summary: games=7 positions=900\n\
                   datagen progress: games=9 positions=1000\n";
        assert_eq!(parse_engine_output(out), BatchCounts::new(7, 900));
    }

    #[test]
    fn last_progress_line_is_used() {
        let out = "datagen progress: games=1 positions=10\n\
                   noise\n\
                   datagen progress: games=2 positions=25\n";
        assert_eq!(parse_engine_output(out), BatchCounts::new(2, 25));
    }

    #[test]
    fn bare_counts_are_accepted() {
        let out = "starting\ngames: 5, positions: 321\ndone\n";
        assert_eq!(parse_engine_output(out), BatchCounts::new(5, 321));
    }

    #[test]
    fn count_first_phrasing() {
        let out = "wrote 12 games, 4567 positions to disk\n";
        assert_eq!(parse_engine_output(out), BatchCounts::new(12, 4567));
    }

    #[test]
    fn singular_counts_are_accepted() {
        assert_eq!(
            parse_engine_output("Generated 1 game, 40 positions\n"),
            BatchCounts::new(1, 40)
        );
        assert_eq!(
            parse_engine_output("Generated 2 games, 1 position\n"),
            BatchCounts::new(2, 1)
        );
        assert_eq!(
            parse_engine_output("datagen summary: game=1 position=9\n"),
            BatchCounts::new(1, 9)
        );
    }

    #[test]
    fn nothing_matches_gives_zero() {
        assert_eq!(parse_engine_output(""), BatchCounts::default());
        assert_eq!(
            parse_engine_output("hello\ngames=4 only\n"),
            BatchCounts::default()
        );
    }

    #[test]
    fn summary_without_counts_falls_through() {
        let out = "datagen summary: interrupted\ndatagen progress: games=3 positions=30\n";
        assert_eq!(parse_engine_output(out), BatchCounts::new(3, 30));
    }
}
