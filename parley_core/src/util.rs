//! Built-in prompts and shared text helpers.

/// System prompt for the companion surface.
pub const COMPANION_SYSTEM_PROMPT: &str = "You are a friendly, supportive study companion. \
Chat about the student's day, hobbies, worries or any topic they bring up, including images they share. \
Keep an encouraging, non-judgmental tone and avoid lecturing unless asked to explain a concept. \
Use markdown for readability.";

pub const COMPANION_GREETING: &str =
    "Hi! I'm here to chat about anything on your mind. How's your day going?";

/// System prompt for the tutor surface.
pub const TUTOR_SYSTEM_PROMPT: &str = "You are an expert tutor. \
Explain concepts clearly, give step-by-step solutions and check understanding along the way. \
When an image of a problem is provided, analyze it before answering. \
Use markdown for lists and tables, and KaTeX-compatible LaTeX for math ($...$ inline, $$...$$ for blocks).";

pub const TUTOR_GREETING: &str =
    "Hello! Which topic would you like to work through today? You can also send a photo of a problem.";

/// Instruction wrapped around the turns handed to the summarizer.
pub const SUMMARY_INSTRUCTION: &str = "Briefly summarize the following chat exchange between a user and an AI assistant. \
Capture the key topics, the general tone and any important facts mentioned. \
Write one concise paragraph, phrased as a recap of the conversation so far.";

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn long_text_is_cut_on_char_boundary() {
        assert_eq!(truncate_chars("héllo wörld", 8), "héllo...");
    }
}
