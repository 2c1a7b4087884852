//! Keyword classifier mapping free-text intent to an [`EditTask`].
//!
//! Groups are checked in a fixed order and the first group with a hit wins.
//! Prompts often mention several groups ("clean up the background" hits
//! both background removal and cleanup), so the order below is policy:
//!
//! ```text
//! enhancement → background_removal → cleanup → style → artistic → creative → advanced
//! ```
//!
//! Empty or unmatched prompts fall back to [`EditTask::Enhancement`], the
//! cheapest task. The function is pure.

use std::sync::LazyLock as Lazy;

use aho_corasick::AhoCorasick;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of edit categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditTask {
    Enhancement,
    BackgroundRemoval,
    Cleanup,
    Style,
    Artistic,
    Creative,
    Advanced,
}

impl EditTask {
    /// Every task, in classifier group order.
    pub const ALL: [EditTask; 7] = [
        EditTask::Enhancement,
        EditTask::BackgroundRemoval,
        EditTask::Cleanup,
        EditTask::Style,
        EditTask::Artistic,
        EditTask::Creative,
        EditTask::Advanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enhancement => "enhancement",
            Self::BackgroundRemoval => "background_removal",
            Self::Cleanup => "cleanup",
            Self::Style => "style",
            Self::Artistic => "artistic",
            Self::Creative => "creative",
            Self::Advanced => "advanced",
        }
    }
}

impl std::fmt::Display for EditTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EditTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "enhancement" | "enhance" => Ok(Self::Enhancement),
            "background_removal" | "background" => Ok(Self::BackgroundRemoval),
            "cleanup" | "clean_up" => Ok(Self::Cleanup),
            "style" => Ok(Self::Style),
            "artistic" => Ok(Self::Artistic),
            "creative" => Ok(Self::Creative),
            "advanced" => Ok(Self::Advanced),
            _ => Err(format!(
                "invalid edit task '{}', expected one of: enhancement, background_removal, \
                 cleanup, style, artistic, creative, advanced",
                s
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Keyword groups
// ---------------------------------------------------------------------------

static ENHANCEMENT_KEYWORDS: &[&str] = &[
    "enhance", "improve", "sharpen", "brighten", "denoise", "upscale",
    "fix lighting", "exposure", "contrast", "color correct", "colour correct", "hdr",
];
static BACKGROUND_KEYWORDS: &[&str] = &[
    "background", "remove bg", "cutout", "cut out", "isolate subject",
    "transparent", "backdrop",
];
static CLEANUP_KEYWORDS: &[&str] = &[
    "clean up", "cleanup", "erase", "remove object", "remove person",
    "remove people", "blemish", "retouch", "inpaint", "remove text",
];
static STYLE_KEYWORDS: &[&str] = &[
    "style", "filter", "vintage", "black and white", "sepia", "film look",
    "cinematic", "preset", "moody",
];
static ARTISTIC_KEYWORDS: &[&str] = &[
    "painting", "watercolor", "watercolour", "sketch", "oil paint", "cartoon",
    "anime", "artistic", "pencil", "comic",
];
static CREATIVE_KEYWORDS: &[&str] = &[
    "replace", "add a", "generate", "imagine", "turn into", "fantasy",
    "surreal", "put me in",
];
static ADVANCED_KEYWORDS: &[&str] = &[
    "relight", "3d", "depth", "outpaint", "expand", "extend", "face swap",
    "change pose",
];

/// Ordered groups. Order is the tie-break between groups.
static GROUPS: Lazy<Vec<(EditTask, AhoCorasick)>> = Lazy::new(|| {
    [
        (EditTask::Enhancement, ENHANCEMENT_KEYWORDS),
        (EditTask::BackgroundRemoval, BACKGROUND_KEYWORDS),
        (EditTask::Cleanup, CLEANUP_KEYWORDS),
        (EditTask::Style, STYLE_KEYWORDS),
        (EditTask::Artistic, ARTISTIC_KEYWORDS),
        (EditTask::Creative, CREATIVE_KEYWORDS),
        (EditTask::Advanced, ADVANCED_KEYWORDS),
    ]
    .into_iter()
    .map(|(task, keywords)| {
        let matcher = AhoCorasick::new(keywords).expect("static keyword set must compile");
        (task, matcher)
    })
    .collect()
});

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lower-case, trim and collapse internal whitespace.
///
/// Shared with the cache key so that prompts which classify identically also
/// hash identically.
pub fn normalize_prompt(prompt: &str) -> String {
    WHITESPACE_RE
        .replace_all(prompt.trim(), " ")
        .to_lowercase()
}

/// Classify a prompt. An explicit override always wins.
pub fn classify(prompt: &str, explicit: Option<EditTask>) -> EditTask {
    if let Some(task) = explicit {
        return task;
    }

    let text = normalize_prompt(prompt);
    if text.is_empty() {
        return EditTask::Enhancement;
    }

    GROUPS
        .iter()
        .find(|(_, matcher)| matcher.is_match(&text))
        .map(|(task, _)| *task)
        .unwrap_or(EditTask::Enhancement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_unconditionally() {
        assert_eq!(
            classify("remove the background", Some(EditTask::Artistic)),
            EditTask::Artistic
        );
    }

    #[test]
    fn empty_prompt_defaults_to_enhancement() {
        assert_eq!(classify("", None), EditTask::Enhancement);
        assert_eq!(classify("   \n\t ", None), EditTask::Enhancement);
    }

    #[test]
    fn unmatched_prompt_defaults_to_enhancement() {
        assert_eq!(classify("do the thing", None), EditTask::Enhancement);
    }

    #[test]
    fn each_group_is_reachable() {
        assert_eq!(classify("please sharpen this", None), EditTask::Enhancement);
        assert_eq!(classify("remove the background please", None), EditTask::BackgroundRemoval);
        assert_eq!(classify("erase the tourists", None), EditTask::Cleanup);
        assert_eq!(classify("give it a vintage look", None), EditTask::Style);
        assert_eq!(classify("make it a watercolor", None), EditTask::Artistic);
        assert_eq!(classify("turn into a dragon", None), EditTask::Creative);
        assert_eq!(classify("relight the scene", None), EditTask::Advanced);
    }

    #[test]
    fn group_order_is_pinned() {
        // background_removal is checked before cleanup
        assert_eq!(classify("clean up the background", None), EditTask::BackgroundRemoval);
        // enhancement is checked before style
        assert_eq!(classify("enhance with a sepia filter", None), EditTask::Enhancement);
        // artistic is checked before creative
        assert_eq!(classify("generate an anime portrait", None), EditTask::Artistic);
        // creative is checked before advanced
        assert_eq!(classify("replace the sky and expand the frame", None), EditTask::Creative);
    }

    #[test]
    fn case_and_spacing_are_normalized() {
        assert_eq!(classify("  CLEAN    UP  my photo ", None), EditTask::Cleanup);
        assert_eq!(normalize_prompt("  Hello \t  World "), "hello world");
    }

    #[test]
    fn task_round_trips_through_str() {
        for task in EditTask::ALL {
            assert_eq!(task.as_str().parse::<EditTask>().unwrap(), task);
        }
        assert!("paint-by-numbers".parse::<EditTask>().is_err());
    }
}
