//! Program model: segments, themes and the hour schedule.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the single broadcast channel.
pub const CHANNEL_NAME: &str = "Radio-24";

/// A labeled interval of a broadcast hour. Advances cycle
/// OP → TOPIC_A → QANDA → JINGLE → NEWS → OP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    #[serde(rename = "OP")]
    Op,
    #[serde(rename = "TOPIC_A")]
    TopicA,
    #[serde(rename = "QANDA")]
    QAndA,
    #[serde(rename = "JINGLE")]
    Jingle,
    #[serde(rename = "NEWS")]
    News,
}

impl Segment {
    pub const CYCLE: [Segment; 5] = [
        Segment::Op,
        Segment::TopicA,
        Segment::QAndA,
        Segment::Jingle,
        Segment::News,
    ];

    /// Successor in the five-segment cycle. NEWS wraps to OP.
    pub fn next(self) -> Segment {
        match self {
            Segment::Op => Segment::TopicA,
            Segment::TopicA => Segment::QAndA,
            Segment::QAndA => Segment::Jingle,
            Segment::Jingle => Segment::News,
            Segment::News => Segment::Op,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Segment::Op => "OP",
            Segment::TopicA => "TOPIC_A",
            Segment::QAndA => "QANDA",
            Segment::Jingle => "JINGLE",
            Segment::News => "NEWS",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-of-day persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub title: String,
    pub color: String,
}

impl Theme {
    fn new(title: &str, color: &str) -> Self {
        Self {
            title: title.to_string(),
            color: color.to_string(),
        }
    }
}

/// The rotating theme list, indexed by `hour % len`.
pub fn themes() -> Vec<Theme> {
    vec![
        Theme::new("深夜の音楽", "#1a1a2e"),
        Theme::new("朝のニュース", "#16213e"),
        Theme::new("午後のトーク", "#0f3460"),
        Theme::new("夜の物語", "#533483"),
    ]
}

/// `themes[hour % themes.len()]`.
pub fn theme_for_hour(hour: u32) -> Theme {
    let list = themes();
    let index = hour as usize % list.len();
    list[index].clone()
}

pub fn find_theme(title: &str) -> Option<Theme> {
    themes().into_iter().find(|t| t.title == title)
}

/// Block label stored with each schedule hour. Wider than [`Segment`]: the
/// schedule also knows MUSIC hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Block {
    Op,
    News,
    #[serde(rename = "QANDA")]
    QAndA,
    Music,
    TopicA,
    Jingle,
}

/// One hour of the schedule for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub channel: String,
    pub hour: u32,
    pub block: Block,
    pub prompt: String,
}

/// Built-in 24-hour schedule for [`CHANNEL_NAME`].
pub fn default_schedule() -> Vec<ScheduleEntry> {
    (0..24)
        .map(|hour| {
            let (block, prompt) = match hour {
                0..=5 => (Block::Music, "深夜の音楽を流しながら、静かに語りかけましょう。"),
                6..=8 => (Block::News, "朝のニュースを分かりやすく伝え、一日の始まりを応援しましょう。"),
                9..=11 => (Block::TopicA, "午前のトピックについて、リスナーと一緒に考えましょう。"),
                12..=14 => (Block::QAndA, "リスナーからの質問に答える時間です。"),
                15..=17 => (Block::Music, "午後の音楽でリラックスした時間を提供しましょう。"),
                18..=20 => (Block::News, "夕方のニュースで一日を振り返りましょう。"),
                _ => (Block::TopicA, "夜のトピックで深く語り合いましょう。"),
            };
            ScheduleEntry {
                channel: CHANNEL_NAME.to_string(),
                hour,
                block,
                prompt: prompt.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_cycle() {
        let mut segment = Segment::Op;
        for expected in Segment::CYCLE.iter().cycle().skip(1).take(10) {
            segment = segment.next();
            assert_eq!(segment, *expected);
        }
        assert_eq!(Segment::News.next(), Segment::Op);
    }

    #[test]
    fn test_segment_wire_names() {
        assert_eq!(serde_json::to_string(&Segment::TopicA).unwrap(), "\"TOPIC_A\"");
        assert_eq!(serde_json::to_string(&Segment::QAndA).unwrap(), "\"QANDA\"");
        assert_eq!(Segment::Jingle.to_string(), "JINGLE");
    }

    #[test]
    fn test_theme_is_pure_function_of_hour() {
        let list = themes();
        for hour in 0..48 {
            assert_eq!(theme_for_hour(hour), list[hour as usize % list.len()]);
        }
        assert_eq!(theme_for_hour(1).title, "朝のニュース");
    }

    #[test]
    fn test_find_theme() {
        assert_eq!(find_theme("夜の物語").unwrap().color, "#533483");
        assert!(find_theme("nonexistent").is_none());
    }

    #[test]
    fn test_default_schedule_covers_every_hour() {
        let schedule = default_schedule();
        assert_eq!(schedule.len(), 24);
        assert_eq!(schedule[0].block, Block::Music);
        assert_eq!(schedule[7].block, Block::News);
        assert_eq!(schedule[13].block, Block::QAndA);
        assert_eq!(schedule[23].block, Block::TopicA);
        assert!(schedule.iter().all(|e| e.channel == CHANNEL_NAME && !e.prompt.is_empty()));
    }
}
