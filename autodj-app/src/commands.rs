//! Line commands read from stdin

use autodj_analysis::advisor::Reaction;

pub const HELP: &str = "commands: p (play/pause), n (transition now), s (songs), \
rate <1-5>, love | like | skip, q (quit)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePlayPause,
    TransitionNow,
    ShowSongs,
    /// Rate the current sound, 1 - 5
    Rate(u8),
    React(Reaction),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let word = words.next()?.to_ascii_lowercase();
        let command = match word.as_str() {
            "p" | "play" | "pause" => Command::TogglePlayPause,
            "n" | "next" => Command::TransitionNow,
            "s" | "songs" => Command::ShowSongs,
            "rate" | "r" => {
                let rating: u8 = words.next()?.parse().ok()?;
                if !(1..=5).contains(&rating) {
                    return None;
                }
                Command::Rate(rating)
            }
            "h" | "help" | "?" => Command::Help,
            "q" | "quit" | "exit" => Command::Quit,
            other => Command::React(Reaction::parse(other)?),
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("p"), Some(Command::TogglePlayPause));
        assert_eq!(Command::parse("  NEXT "), Some(Command::TransitionNow));
        assert_eq!(Command::parse("rate 4"), Some(Command::Rate(4)));
        assert_eq!(Command::parse("love"), Some(Command::React(Reaction::Love)));
        assert_eq!(Command::parse("Skip"), Some(Command::React(Reaction::Skip)));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
    }

    #[test]
    fn test_rejects() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("rate"), None);
        assert_eq!(Command::parse("rate 9"), None);
        assert_eq!(Command::parse("rate x"), None);
        assert_eq!(Command::parse("dance"), None);
    }
}
