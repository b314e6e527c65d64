use tracing::{debug, warn};

/// Loads variables from a `.env` file in the working directory or one of its
/// parents, if there is one.
///
/// A missing file is fine. A malformed one is reported and skipped.
pub fn load_dotenvy_vars_if_present() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring malformed .env file: {e}"),
    }
}
