use rustrict::CensorStr;

/// Streamed reply for queries rejected by the profanity screen.
pub const MODERATION_MESSAGE: &str =
    "The Book Search service is moderated and does not allow profanity.";

/// Classify text against the built-in profanity word list.
/// The classifier runs in-process and never fails for well-formed input.
pub fn is_profane(text: &str) -> bool {
    text.is_inappropriate()
}

/// Censored variant of the text, used when a rejected query has to appear in
/// the logs.
pub fn censor(text: &str) -> String {
    text.censor()
}
