//! Question Bank
//!
//! Built-in catalogue of behavioral prompts tagged by competency. Interviews
//! are generated up front by cycling the catalogue, so evaluation never
//! depends on question generation at answer time.

use starline_common::db::Difficulty;

/// A question before it is bound to an interview
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraft {
    pub competency: String,
    pub text: String,
    pub difficulty: Difficulty,
}

struct Prompt {
    competency: &'static str,
    text: &'static str,
    difficulty: Difficulty,
}

const CATALOGUE: &[Prompt] = &[
    Prompt {
        competency: "leadership",
        text: "Tell me about a time you led a team through a difficult change.",
        difficulty: Difficulty::Medium,
    },
    Prompt {
        competency: "communication",
        text: "Describe a situation where you had to explain a complex topic to a non-expert audience.",
        difficulty: Difficulty::Easy,
    },
    Prompt {
        competency: "problem_solving",
        text: "Give an example of a problem you solved with limited information.",
        difficulty: Difficulty::Medium,
    },
    Prompt {
        competency: "teamwork",
        text: "Tell me about a time you worked with a colleague whose style differed from yours.",
        difficulty: Difficulty::Easy,
    },
    Prompt {
        competency: "conflict_resolution",
        text: "Describe a disagreement with a stakeholder and how you resolved it.",
        difficulty: Difficulty::Hard,
    },
    Prompt {
        competency: "adaptability",
        text: "Tell me about a time priorities changed suddenly. What did you do?",
        difficulty: Difficulty::Medium,
    },
    Prompt {
        competency: "ownership",
        text: "Describe a mistake you made at work and how you handled it.",
        difficulty: Difficulty::Medium,
    },
    Prompt {
        competency: "customer_focus",
        text: "Give an example of going beyond expectations for a customer or user.",
        difficulty: Difficulty::Easy,
    },
    Prompt {
        competency: "decision_making",
        text: "Tell me about a difficult decision you made under time pressure.",
        difficulty: Difficulty::Hard,
    },
    Prompt {
        competency: "time_management",
        text: "Describe how you handled several competing deadlines at once.",
        difficulty: Difficulty::Medium,
    },
    Prompt {
        competency: "influence",
        text: "Tell me about a time you convinced others to adopt your idea without formal authority.",
        difficulty: Difficulty::Hard,
    },
    Prompt {
        competency: "learning_agility",
        text: "Describe a situation where you had to learn a new skill quickly to deliver a result.",
        difficulty: Difficulty::Easy,
    },
];

/// Question generator backed by the built-in catalogue
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionBank;

impl QuestionBank {
    pub fn new() -> Self {
        Self
    }

    /// Number of distinct prompts
    pub fn catalogue_size(&self) -> usize {
        CATALOGUE.len()
    }

    /// Generate `total` questions in interview order.
    ///
    /// Prompts repeat only once the catalogue is exhausted.
    pub fn generate(&self, total: u32) -> Vec<QuestionDraft> {
        CATALOGUE
            .iter()
            .cycle()
            .take(total as usize)
            .map(|prompt| QuestionDraft {
                competency: prompt.competency.to_string(),
                text: prompt.text.to_string(),
                difficulty: prompt.difficulty,
            })
            .collect()
    }
}
