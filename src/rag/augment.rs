//! Keyword expansion applied to a question before retrieval.
//!
//! Deliberately simple: each [`TriggerRule`] looks for substrings in the
//! lowercased question and contributes a fixed keyword group. New topics are
//! added by appending rules, not by changing the matcher. The expanded text is
//! only used for the vector search; the chat model always sees the original
//! question.

const KEYWORD_HEADER: &str = "\n\nRelated keywords: ";

/// Fires when every `all_of` group has a match and no `none_of` term appears.
#[derive(Debug, Clone)]
pub struct TriggerRule {
    /// Each inner slice is an "any of" group; all groups must match.
    pub all_of: Vec<Vec<&'static str>>,
    pub none_of: Vec<&'static str>,
    pub keywords: Vec<&'static str>,
}

impl TriggerRule {
    pub fn when(any_of: &[&'static str]) -> Self {
        Self {
            all_of: vec![any_of.to_vec()],
            none_of: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn and(mut self, any_of: &[&'static str]) -> Self {
        self.all_of.push(any_of.to_vec());
        self
    }

    pub fn unless(mut self, terms: &[&'static str]) -> Self {
        self.none_of.extend_from_slice(terms);
        self
    }

    pub fn add(mut self, keywords: &[&'static str]) -> Self {
        self.keywords.extend_from_slice(keywords);
        self
    }

    fn matches(&self, lowered: &str) -> bool {
        self.all_of
            .iter()
            .all(|group| group.iter().any(|term| lowered.contains(term)))
            && !self.none_of.iter().any(|term| lowered.contains(term))
    }
}

#[derive(Debug, Clone)]
pub struct QueryAugmenter {
    rules: Vec<TriggerRule>,
}

impl Default for QueryAugmenter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl QueryAugmenter {
    pub fn new(rules: Vec<TriggerRule>) -> Self {
        Self { rules }
    }

    /// Returns `user_text` unchanged when no rule fires.
    pub fn augment(&self, user_text: &str) -> String {
        let lowered = user_text.to_lowercase();
        let mut keywords: Vec<&str> = Vec::new();

        for rule in self.rules.iter().filter(|rule| rule.matches(&lowered)) {
            for keyword in &rule.keywords {
                if !keywords.contains(keyword) {
                    keywords.push(keyword);
                }
            }
        }

        if keywords.is_empty() {
            return user_text.to_string();
        }
        format!("{}{}{}", user_text, KEYWORD_HEADER, keywords.join(", "))
    }
}

const FIRST_YEAR_TERMS: [&str; 6] = [
    "first-year",
    "first year",
    "freshman",
    "freshmen",
    "ftic",
    "incoming student",
];

/// Onboarding topics: orientation, international students, first-year status.
pub fn default_rules() -> Vec<TriggerRule> {
    vec![
        TriggerRule::when(&["orientation"]).add(&[
            "orientation",
            "new student orientation",
            "orientation registration",
            "orientation schedule",
        ]),
        TriggerRule::when(&["international"])
            .and(&["orientation"])
            .add(&[
                "international student orientation",
                "glo-bull",
                "international student services",
                "immigration check-in",
            ]),
        TriggerRule::when(&["orientation"])
            .and(&FIRST_YEAR_TERMS)
            .add(&["first-year students"]),
        TriggerRule::when(&["international"])
            .unless(&["orientation"])
            .add(&[
                "international students",
                "international admissions",
                "visa",
                "I-20",
            ]),
    ]
}
