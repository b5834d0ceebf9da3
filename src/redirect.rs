//! Sign-out redirect target.

#[cfg(test)]
#[path = "redirect_test.rs"]
mod tests;

use url::Url;

use crate::error::RedirectError;

/// Query parameter carrying the path to return to after signing back in.
pub const REDIRECT_PARAM: &str = "redirectTo";

/// Build `<origin>/?redirectTo=<current_path>`.
///
/// Any path, query or fragment already on `origin` is discarded.
///
/// # Errors
///
/// Returns an error if `origin` cannot carry a path (e.g. `mailto:`).
pub fn sign_out_redirect(origin: &Url, current_path: &str) -> Result<Url, RedirectError> {
    if origin.cannot_be_a_base() {
        return Err(RedirectError::NotABase(origin.to_string()));
    }
    let mut url = origin.clone();
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair(REDIRECT_PARAM, current_path);
    Ok(url)
}
