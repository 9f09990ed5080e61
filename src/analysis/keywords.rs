use serde::{Deserialize, Serialize};

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

/// Keyword sets driving content-type and difficulty classification.
///
/// Content-type sets are checked against the title in declaration order
/// (trend, explainer, tool, analysis); difficulty sets against title and
/// description, beginner first. Any field left out of a config file keeps
/// its default list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordTables {
    pub trend: Vec<String>,
    pub explainer: Vec<String>,
    pub tool: Vec<String>,
    pub analysis: Vec<String>,
    pub beginner: Vec<String>,
    pub advanced: Vec<String>,
    /// Title words that earn the hot-topic bonus
    pub hot_words: Vec<String>,
    /// Title words that earn the hands-on bonus
    pub action_words: Vec<String>,
}

impl Default for KeywordTables {
    fn default() -> Self {
        Self {
            trend: words(&[
                "話題", "人気", "注目", "バズ", "話題沸騰", "急上昇", "ランキング", "popular",
                "trend",
            ]),
            explainer: words(&[
                "解説", "入門", "基礎", "初心者", "学習", "理解", "仕組み", "原理", "tutorial",
                "guide",
            ]),
            tool: words(&[
                "ツール", "ライブラリ", "フレームワーク", "アプリ", "サービス", "使い方", "導入",
                "tool", "library",
            ]),
            analysis: words(&[
                "分析", "調査", "レポート", "統計", "データ", "比較", "検証", "考察", "analysis",
                "report",
            ]),
            beginner: words(&[
                "初心者", "入門", "基礎", "基本", "はじめて", "簡単", "やさしい", "beginner",
                "getting started",
            ]),
            advanced: words(&[
                "上級", "高度", "アドバンス", "詳細", "深い", "プロ", "エキスパート", "advanced",
                "deep dive",
            ]),
            hot_words: words(&["人気", "話題", "注目"]),
            action_words: words(&["実践", "実装", "作り方", "やり方"]),
        }
    }
}

impl KeywordTables {
    /// Same tables with every keyword lowercased and blanks removed.
    pub(crate) fn normalized(mut self) -> Self {
        for list in [
            &mut self.trend,
            &mut self.explainer,
            &mut self.tool,
            &mut self.analysis,
            &mut self.beginner,
            &mut self.advanced,
            &mut self.hot_words,
            &mut self.action_words,
        ] {
            *list = list
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect();
        }
        self
    }
}

/// True when `haystack` (already lowercased) contains any of `keywords`.
pub(crate) fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}

/// Score contributions. All values are points on the 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub base: f64,
    pub trend: f64,
    pub news: f64,
    pub explainer: f64,
    pub tool: f64,
    pub analysis: f64,
    pub beginner: f64,
    pub intermediate: f64,
    pub advanced: f64,
    pub hot_word_bonus: f64,
    pub action_word_bonus: f64,
    /// Published within 6 hours
    pub within_6h: f64,
    /// Published within 12 hours
    pub within_12h: f64,
    /// Published within 24 hours
    pub within_24h: f64,
    /// Title of 20 to 60 characters
    pub title_length_bonus: f64,
    /// Subtracted for titles over 80 characters
    pub long_title_penalty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 50.0,
            trend: 30.0,
            news: 25.0,
            explainer: 20.0,
            tool: 15.0,
            analysis: 10.0,
            beginner: 15.0,
            intermediate: 10.0,
            advanced: 5.0,
            hot_word_bonus: 10.0,
            action_word_bonus: 5.0,
            within_6h: 20.0,
            within_12h: 15.0,
            within_24h: 10.0,
            title_length_bonus: 5.0,
            long_title_penalty: 5.0,
        }
    }
}
