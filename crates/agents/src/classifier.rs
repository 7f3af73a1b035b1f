use std::fmt;

/// The classified purpose of a user query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Data retrieval: the query should be answered by running SQL.
    SqlQuery,
    /// The user wants a chart or other visualization.
    Visualization,
    /// Anything else: answered directly by the model.
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::SqlQuery => "sql_query",
            Intent::Visualization => "visualization",
            Intent::General => "general",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SQL_KEYWORDS: &[&str] = &[
    "query", "select", "fetch", "get", "show", "list", "find",
    "database", "table", "data", "rows", "records", "sql",
    "where", "from", "join", "count", "sum", "average",
    "filter", "search", "lookup", "retrieve",
];

const VISUALIZATION_KEYWORDS: &[&str] = &[
    "chart", "graph", "plot", "visualize", "visualization",
    "bar", "line", "pie", "scatter", "histogram",
    "display", "render", "draw", "show chart", "create chart",
    "trend", "comparison", "distribution",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "help", "how", "what", "explain", "describe",
    "information", "about", "tell me",
];

/// Classifies user queries into intents by lexical keyword scoring.
///
/// The vocabulary table is built once and never mutated, so one classifier
/// can serve any number of concurrent callers without locking. Vocabularies
/// are kept in a fixed array; on equal scores the earlier entry wins
/// (SqlQuery over Visualization over General).
pub struct IntentClassifier {
    vocabularies: [(Intent, &'static [&'static str]); 3],
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {
            vocabularies: [
                (Intent::SqlQuery, SQL_KEYWORDS),
                (Intent::Visualization, VISUALIZATION_KEYWORDS),
                (Intent::General, GENERAL_KEYWORDS),
            ],
        }
    }

    /// Determine the intent of a user query.
    pub fn classify(&self, query: &str) -> Intent {
        self.classify_with_confidence(query).0
    }

    /// Classify and report how certain the classification is, as the
    /// normalized margin between the two best-scoring intents. Always in
    /// [0, 1]; zero when no vocabulary matched at all.
    pub fn classify_with_confidence(&self, query: &str) -> (Intent, f64) {
        let query_lower = query.to_lowercase();
        let words: Vec<&str> = query_lower.split_whitespace().collect();

        let mut scores = self.keyword_scores(&query_lower, &words);
        apply_heuristics(&query_lower, &mut scores);

        let mut best = Intent::General;
        let mut max_score = 0.0;
        let mut second_score = 0.0;
        for (intent, score) in scores {
            if score > max_score {
                second_score = max_score;
                max_score = score;
                best = intent;
            } else if score > second_score {
                second_score = score;
            }
        }

        if max_score < 0.1 {
            return (Intent::General, 0.0);
        }

        let confidence = if second_score > 0.0 {
            (max_score - second_score) / max_score
        } else {
            max_score.min(1.0)
        };

        (best, confidence)
    }

    /// Score each vocabulary against the query: +2 per token equal to a
    /// matched keyword, +1 per token with partial overlap, and a 0.5
    /// substring credit if the vocabulary's total is still zero after the
    /// token pass. Totals are normalized by vocabulary size.
    fn keyword_scores(&self, query: &str, words: &[&str]) -> [(Intent, f64); 3] {
        let mut scores = [(Intent::General, 0.0); 3];
        for (i, (intent, keywords)) in self.vocabularies.iter().enumerate() {
            let mut score = 0.0;
            for keyword in keywords.iter().copied() {
                if query.contains(keyword) {
                    for word in words.iter().copied() {
                        if word == keyword {
                            score += 2.0;
                        } else if word.contains(keyword) || keyword.contains(word) {
                            score += 1.0;
                        }
                    }
                    if score == 0.0 {
                        score += 0.5;
                    }
                }
            }
            scores[i] = (*intent, score / keywords.len() as f64);
        }
        scores
    }
}

fn apply_heuristics(query: &str, scores: &mut [(Intent, f64); 3]) {
    // Explicit chart vocabulary is a strong visualization signal.
    if contains_any(query, &["chart", "graph", "plot", "visualize"]) {
        bump(scores, Intent::Visualization, 1.0);
    }

    // Questions about database structure lean SQL.
    if contains_any(query, &["table", "schema", "column", "database"]) {
        bump(scores, Intent::SqlQuery, 0.5);
    }

    // A display verb plus a chart noun reads as a combined request;
    // visualization takes priority.
    if contains_any(query, &["show", "display"]) && contains_any(query, &["chart", "graph"]) {
        bump(scores, Intent::Visualization, 0.5);
    }

    // Counting questions scoped to the data are SQL.
    if (query.starts_with("how many") || query.starts_with("what is"))
        && contains_any(query, &["in the database", "in the table", "records", "rows"])
    {
        bump(scores, Intent::SqlQuery, 0.5);
    }
}

fn bump(scores: &mut [(Intent, f64); 3], intent: Intent, amount: f64) {
    for (i, score) in scores.iter_mut() {
        if *i == intent {
            *score += amount;
        }
    }
}

fn contains_any(s: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| s.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_vocabulary_classifies_sql() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify("Select all users from the table"), Intent::SqlQuery);
        assert_eq!(classifier.classify("List all tables"), Intent::SqlQuery);
        assert_eq!(classifier.classify("Show me the schema"), Intent::SqlQuery);
        assert_eq!(
            classifier.classify("How many records are in the database?"),
            Intent::SqlQuery
        );
    }

    #[test]
    fn test_chart_vocabulary_classifies_visualization() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify("Draw a pie chart"), Intent::Visualization);
        assert_eq!(classifier.classify("Create a bar chart"), Intent::Visualization);
        assert_eq!(classifier.classify("Make a line graph of revenue"), Intent::Visualization);
    }

    #[test]
    fn test_bar_chart_of_sales_is_visualization() {
        let classifier = IntentClassifier::new();
        let (intent, confidence) =
            classifier.classify_with_confidence("Create a bar chart of sales by month");
        assert_eq!(intent, Intent::Visualization);
        assert!(confidence > 0.0);
    }

    #[test]
    fn test_general_fallback_without_keywords() {
        let classifier = IntentClassifier::new();
        let (intent, confidence) = classifier.classify_with_confidence("zzz qqq xyzzy");
        assert_eq!(intent, Intent::General);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_general_question() {
        let classifier = IntentClassifier::new();
        assert_eq!(
            classifier.classify("What can you help me with?"),
            Intent::General
        );
    }

    #[test]
    fn test_confidence_is_bounded() {
        let classifier = IntentClassifier::new();
        let queries = [
            "Select all users",
            "Draw a pie chart of sales",
            "How many orders are there per month?",
            "What can you do?",
            "show me a graph of the data in the table",
            "",
        ];
        for query in queries {
            let (_, confidence) = classifier.classify_with_confidence(query);
            assert!(
                (0.0..=1.0).contains(&confidence),
                "confidence {} out of range for {:?}",
                confidence,
                query
            );
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let classifier = IntentClassifier::new();
        let query = "show me a chart of the orders table";
        let first = classifier.classify(query);
        for _ in 0..10 {
            assert_eq!(classifier.classify(query), first);
        }
    }
}
