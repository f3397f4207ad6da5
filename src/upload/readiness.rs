//! Submit readiness gate

use super::session::SessionState;

/// Whether the client may now submit.
///
/// Requires a non-zero declared file count, every declared file fully
/// received, and a step list (an empty list counts as declared).
pub fn is_ready(session: &SessionState) -> bool {
    session.expected_file_count() > 0
        && session.completed_file_count() == session.expected_file_count()
        && session.steps().is_some()
}
