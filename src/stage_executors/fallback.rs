use crate::types::FallbackReason;

/// User-facing text for a terminal failure. Never carries engine errors,
/// SQL, or pipeline internals.
#[must_use]
pub const fn fallback_message(reason: FallbackReason) -> &'static str {
    match reason {
        FallbackReason::NotUnderstood => {
            "I couldn't work out which data this question is about. Could you rephrase it, mentioning what you want to measure and over which period?"
        }
        FallbackReason::UnsafeRequest => {
            "I can only read data to answer questions. Requests that change or delete data aren't something I can do."
        }
        FallbackReason::PermissionDenied => {
            "You don't have access to the data needed for this question. Please check with your administrator."
        }
        FallbackReason::DataSourceUnavailable => {
            "The data source isn't reachable right now. Please try again in a few minutes."
        }
        FallbackReason::QueryTimedOut => {
            "That question took too long to answer. Try narrowing it down, for example to a shorter time range."
        }
        FallbackReason::RepeatedFailure | FallbackReason::RetriesExhausted => {
            "I wasn't able to build a working query for this question. Try rephrasing it or breaking it into smaller questions."
        }
        FallbackReason::ServiceUnavailable => {
            "The assistant is temporarily unavailable. Please try again shortly."
        }
        FallbackReason::Internal => {
            "Something went wrong while answering this question. Please try again."
        }
    }
}
